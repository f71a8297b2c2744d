//! Per-resource services over [`ChatClient`].
//!
//! Each service is a borrowed view (`client.spaces()`, `client.messages()`,
//! ...) that assembles a path and query and delegates to the generic
//! invoker. Bare space and emoji IDs are accepted wherever a full resource
//! name is expected.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::CoreError;
use crate::chat::client::{ChatClient, Download, PageRequest, Query, normalize_name, require};

const SPACES: &str = "spaces";
const CUSTOM_EMOJIS: &str = "customEmojis";

fn space_name(name: &str) -> Result<String, CoreError> {
    Ok(normalize_name(require(name, "space name")?, SPACES))
}

fn space_child(name: &str, what: &str) -> Result<String, CoreError> {
    Ok(normalize_name(require(name, what)?, SPACES))
}

impl ChatClient {
    /// Spaces service.
    #[must_use]
    pub const fn spaces(&self) -> Spaces<'_> {
        Spaces { client: self }
    }

    /// Messages service.
    #[must_use]
    pub const fn messages(&self) -> Messages<'_> {
        Messages { client: self }
    }

    /// Memberships service.
    #[must_use]
    pub const fn members(&self) -> Members<'_> {
        Members { client: self }
    }

    /// Reactions service.
    #[must_use]
    pub const fn reactions(&self) -> Reactions<'_> {
        Reactions { client: self }
    }

    /// Custom emoji service.
    #[must_use]
    pub const fn emoji(&self) -> Emojis<'_> {
        Emojis { client: self }
    }

    /// Attachment metadata service.
    #[must_use]
    pub const fn attachments(&self) -> Attachments<'_> {
        Attachments { client: self }
    }

    /// Media upload/download service.
    #[must_use]
    pub const fn media(&self) -> Media<'_> {
        Media { client: self }
    }

    /// Space events service.
    #[must_use]
    pub const fn events(&self) -> Events<'_> {
        Events { client: self }
    }

    /// Read state service.
    #[must_use]
    pub const fn read_state(&self) -> ReadState<'_> {
        ReadState { client: self }
    }

    /// Notification settings service.
    #[must_use]
    pub const fn notifications(&self) -> Notifications<'_> {
        Notifications { client: self }
    }
}

/// `spaces` and `spaces:*` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Spaces<'a> {
    client: &'a ChatClient,
}

/// Options for [`Spaces::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchSpaces {
    /// Search query (required by the API).
    pub query: String,
    /// Sort order, e.g. `create_time desc`.
    pub order_by: String,
    /// Use administrator privileges.
    pub admin: bool,
}

impl Spaces<'_> {
    /// List spaces the caller is a member of.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list(&self, filter: &str, page: &PageRequest) -> Result<Value, CoreError> {
        let query = Query::new().with("filter", filter).with_page(page);
        self.client.get(SPACES, &query).await
    }

    /// Get a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str, admin: bool) -> Result<Value, CoreError> {
        let query = Query::new().with_flag("useAdminAccess", admin);
        self.client.get(&space_name(name)?, &query).await
    }

    /// Create a named space.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create(
        &self,
        space: &(impl Serialize + ?Sized),
        request_id: &str,
    ) -> Result<Value, CoreError> {
        let query = Query::new().with("requestId", request_id);
        self.client.post(SPACES, &query, space).await
    }

    /// Update fields of a space named in `update_mask`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn patch(
        &self,
        name: &str,
        space: &(impl Serialize + ?Sized),
        update_mask: &str,
        admin: bool,
    ) -> Result<Value, CoreError> {
        let query = Query::new()
            .with("updateMask", update_mask)
            .with_flag("useAdminAccess", admin);
        self.client.patch(&space_name(name)?, &query, space).await
    }

    /// Delete a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn delete(&self, name: &str, admin: bool) -> Result<Value, CoreError> {
        let query = Query::new().with_flag("useAdminAccess", admin);
        self.client.delete(&space_name(name)?, &query).await
    }

    /// Search spaces visible to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn search(
        &self,
        options: &SearchSpaces,
        page: &PageRequest,
    ) -> Result<Value, CoreError> {
        let query = Query::new()
            .with("query", &options.query)
            .with_page(page)
            .with("orderBy", &options.order_by)
            .with_flag("useAdminAccess", options.admin);
        self.client.get("spaces:search", &query).await
    }

    /// Create a space and add the listed members in one call.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn setup(&self, request: &(impl Serialize + ?Sized)) -> Result<Value, CoreError> {
        self.client.post("spaces:setup", &Query::new(), request).await
    }

    /// Find the direct message space with `user` (`users/{user}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the user is empty or the request fails.
    pub async fn find_direct_message(&self, user: &str) -> Result<Value, CoreError> {
        let user = normalize_name(require(user, "user name")?, "users");
        let query = Query::new().with("name", &user);
        self.client.get("spaces:findDirectMessage", &query).await
    }

    /// Finish importing a space created in import mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn complete_import(&self, name: &str) -> Result<Value, CoreError> {
        let path = format!("{}:completeImport", space_name(name)?);
        self.client
            .post(&path, &Query::new(), &serde_json::json!({}))
            .await
    }
}

/// `spaces/*/messages` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Messages<'a> {
    client: &'a ChatClient,
}

/// Options for [`Messages::list`].
#[derive(Debug, Clone, Default)]
pub struct ListMessages {
    /// Filter expression, e.g. `createTime > "2024-01-01T00:00:00Z"`.
    pub filter: String,
    /// `createTime asc` or `createTime desc`.
    pub order_by: String,
    /// Include deleted messages.
    pub show_deleted: bool,
}

/// Options for [`Messages::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateMessage {
    /// Client thread key to start or reply in a thread.
    pub thread_key: String,
    /// Idempotency key.
    pub request_id: String,
    /// Client-assigned message ID (`client-...`).
    pub message_id: String,
    /// Reply behavior, e.g. `REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD`.
    pub reply_option: String,
}

impl Messages<'_> {
    /// List messages in a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn list(
        &self,
        parent: &str,
        options: &ListMessages,
        page: &PageRequest,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/messages", space_name(parent)?);
        let query = Query::new()
            .with_page(page)
            .with("filter", &options.filter)
            .with("orderBy", &options.order_by)
            .with_flag("showDeleted", options.show_deleted);
        self.client.get(&path, &query).await
    }

    /// Get a message (`spaces/{space}/messages/{message}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .get(&space_child(name, "message name")?, &Query::new())
            .await
    }

    /// Send a message to a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn create(
        &self,
        parent: &str,
        message: &(impl Serialize + ?Sized),
        options: &CreateMessage,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/messages", space_name(parent)?);
        let query = Query::new()
            .with("threadKey", &options.thread_key)
            .with("requestId", &options.request_id)
            .with("messageId", &options.message_id)
            .with("messageReplyOption", &options.reply_option);
        self.client.post(&path, &query, message).await
    }

    /// Update the fields of a message named in `update_mask`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn patch(
        &self,
        name: &str,
        message: &(impl Serialize + ?Sized),
        update_mask: &str,
        allow_missing: bool,
    ) -> Result<Value, CoreError> {
        let query = update_query(update_mask, allow_missing);
        self.client
            .patch(&space_child(name, "message name")?, &query, message)
            .await
    }

    /// Replace a message (`PUT`).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn update(
        &self,
        name: &str,
        message: &(impl Serialize + ?Sized),
        update_mask: &str,
        allow_missing: bool,
    ) -> Result<Value, CoreError> {
        let query = update_query(update_mask, allow_missing);
        self.client
            .put(&space_child(name, "message name")?, &query, message)
            .await
    }

    /// Delete a message. `force` also deletes threaded replies.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn delete(&self, name: &str, force: bool) -> Result<Value, CoreError> {
        let query = Query::new().with_flag("force", force);
        self.client
            .delete(&space_child(name, "message name")?, &query)
            .await
    }
}

fn update_query(update_mask: &str, allow_missing: bool) -> Query {
    Query::new()
        .with("updateMask", update_mask)
        .with_flag("allowMissing", allow_missing)
}

/// `spaces/*/members` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Members<'a> {
    client: &'a ChatClient,
}

/// Options for [`Members::list`].
#[derive(Debug, Clone, Default)]
pub struct ListMembers {
    /// Filter by role or member type.
    pub filter: String,
    /// Include invited memberships.
    pub show_invited: bool,
    /// Include Google Group memberships.
    pub show_groups: bool,
    /// Use administrator privileges.
    pub admin: bool,
}

impl Members<'_> {
    /// List memberships of a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn list(
        &self,
        parent: &str,
        options: &ListMembers,
        page: &PageRequest,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/members", space_name(parent)?);
        let query = Query::new()
            .with_page(page)
            .with("filter", &options.filter)
            .with_flag("showInvited", options.show_invited)
            .with_flag("showGroups", options.show_groups)
            .with_flag("useAdminAccess", options.admin);
        self.client.get(&path, &query).await
    }

    /// Get a membership (`spaces/{space}/members/{member}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str, admin: bool) -> Result<Value, CoreError> {
        let query = Query::new().with_flag("useAdminAccess", admin);
        self.client
            .get(&space_child(name, "membership name")?, &query)
            .await
    }

    /// Add a member to a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn create(
        &self,
        parent: &str,
        membership: &(impl Serialize + ?Sized),
        admin: bool,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/members", space_name(parent)?);
        let query = Query::new().with_flag("useAdminAccess", admin);
        self.client.post(&path, &query, membership).await
    }

    /// Update a membership (for example its role).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn patch(
        &self,
        name: &str,
        membership: &(impl Serialize + ?Sized),
        update_mask: &str,
        admin: bool,
    ) -> Result<Value, CoreError> {
        let query = Query::new()
            .with("updateMask", update_mask)
            .with_flag("useAdminAccess", admin);
        self.client
            .patch(&space_child(name, "membership name")?, &query, membership)
            .await
    }

    /// Remove a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn delete(&self, name: &str, admin: bool) -> Result<Value, CoreError> {
        let query = Query::new().with_flag("useAdminAccess", admin);
        self.client
            .delete(&space_child(name, "membership name")?, &query)
            .await
    }
}

/// `spaces/*/messages/*/reactions` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Reactions<'a> {
    client: &'a ChatClient,
}

impl Reactions<'_> {
    /// List reactions on a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn list(
        &self,
        parent: &str,
        filter: &str,
        page: &PageRequest,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/reactions", space_child(parent, "message name")?);
        let query = Query::new().with_page(page).with("filter", filter);
        self.client.get(&path, &query).await
    }

    /// React to a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn create(
        &self,
        parent: &str,
        reaction: &(impl Serialize + ?Sized),
    ) -> Result<Value, CoreError> {
        let path = format!("{}/reactions", space_child(parent, "message name")?);
        self.client.post(&path, &Query::new(), reaction).await
    }

    /// Remove a reaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn delete(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .delete(&space_child(name, "reaction name")?, &Query::new())
            .await
    }
}

/// `customEmojis` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Emojis<'a> {
    client: &'a ChatClient,
}

impl Emojis<'_> {
    /// List custom emoji.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list(&self, filter: &str, page: &PageRequest) -> Result<Value, CoreError> {
        let query = Query::new().with("filter", filter).with_page(page);
        self.client.get(CUSTOM_EMOJIS, &query).await
    }

    /// Get a custom emoji.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str) -> Result<Value, CoreError> {
        let name = normalize_name(require(name, "emoji name")?, CUSTOM_EMOJIS);
        self.client.get(&name, &Query::new()).await
    }

    /// Create a custom emoji.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create(&self, emoji: &(impl Serialize + ?Sized)) -> Result<Value, CoreError> {
        self.client.post(CUSTOM_EMOJIS, &Query::new(), emoji).await
    }

    /// Delete a custom emoji.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn delete(&self, name: &str) -> Result<Value, CoreError> {
        let name = normalize_name(require(name, "emoji name")?, CUSTOM_EMOJIS);
        self.client.delete(&name, &Query::new()).await
    }
}

/// Attachment metadata.
#[derive(Debug, Clone, Copy)]
pub struct Attachments<'a> {
    client: &'a ChatClient,
}

impl Attachments<'_> {
    /// Get attachment metadata (`spaces/{space}/messages/{message}/attachments/{attachment}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .get(&space_child(name, "attachment name")?, &Query::new())
            .await
    }
}

/// Media upload and download.
#[derive(Debug, Clone, Copy)]
pub struct Media<'a> {
    client: &'a ChatClient,
}

impl Media<'_> {
    /// Upload a file from disk as an attachment to a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the request fails.
    pub async fn upload(&self, parent: &str, file: &Path) -> Result<Value, CoreError> {
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("{} is not a file path", file.display()))
            })?;
        let content = tokio::fs::read(file).await.map_err(|e| {
            CoreError::InvalidInput(format!("reading {}: {e}", file.display()))
        })?;
        self.upload_bytes(parent, content, &filename).await
    }

    /// Upload in-memory content as an attachment to a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn upload_bytes(
        &self,
        parent: &str,
        content: Vec<u8>,
        filename: &str,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/attachments:upload", space_name(parent)?);
        self.client
            .upload(&path, &Query::new(), content, filename)
            .await
    }

    /// Start downloading an attachment's media by its `attachmentDataRef.resourceName`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn download(&self, resource_name: &str) -> Result<Download, CoreError> {
        self.client.download(resource_name).await
    }
}

/// `spaces/*/spaceEvents` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Events<'a> {
    client: &'a ChatClient,
}

impl Events<'_> {
    /// List events in a space. The API requires an event-type filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is empty or the request fails.
    pub async fn list(
        &self,
        parent: &str,
        filter: &str,
        page: &PageRequest,
    ) -> Result<Value, CoreError> {
        let path = format!("{}/spaceEvents", space_name(parent)?);
        let query = Query::new().with("filter", filter).with_page(page);
        self.client.get(&path, &query).await
    }

    /// Get a space event.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .get(&space_child(name, "event name")?, &Query::new())
            .await
    }
}

/// `users/*/spaces/*/spaceReadState` and thread read state.
#[derive(Debug, Clone, Copy)]
pub struct ReadState<'a> {
    client: &'a ChatClient,
}

impl ReadState<'_> {
    /// Get `users/{user}/spaces/{space}/spaceReadState`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get_space_read_state(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .get(require(name, "read state name")?, &Query::new())
            .await
    }

    /// Update the caller's read state in a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn update_space_read_state(
        &self,
        name: &str,
        state: &(impl Serialize + ?Sized),
        update_mask: &str,
    ) -> Result<Value, CoreError> {
        let query = Query::new().with("updateMask", update_mask);
        self.client
            .patch(require(name, "read state name")?, &query, state)
            .await
    }

    /// Get `users/{user}/spaces/{space}/threads/{thread}/threadReadState`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get_thread_read_state(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .get(require(name, "read state name")?, &Query::new())
            .await
    }
}

/// `users/*/spaces/*/spaceNotificationSetting` endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Notifications<'a> {
    client: &'a ChatClient,
}

impl Notifications<'_> {
    /// Get a notification setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn get(&self, name: &str) -> Result<Value, CoreError> {
        self.client
            .get(require(name, "notification setting name")?, &Query::new())
            .await
    }

    /// Update a notification setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the request fails.
    pub async fn patch(
        &self,
        name: &str,
        setting: &(impl Serialize + ?Sized),
        update_mask: &str,
    ) -> Result<Value, CoreError> {
        let query = Query::new().with("updateMask", update_mask);
        self.client
            .patch(require(name, "notification setting name")?, &query, setting)
            .await
    }
}
