//! Typed views of common Chat API resources.
//!
//! The client returns raw JSON; these types are for callers that want
//! structured access. Unknown fields are ignored and most fields are
//! optional, since the API omits anything unset.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;

/// A Chat user or bot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    /// Resource name (`users/{user}`).
    pub name: String,
    /// Display name, when the caller can see it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// `HUMAN` or `BOT`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
}

/// A space: a room, group chat, or direct message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Space {
    /// Resource name (`spaces/{space}`).
    pub name: String,
    /// Display name. Empty for direct messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// `SPACE`, `GROUP_CHAT`, or `DIRECT_MESSAGE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_type: Option<String>,
    /// Threading behavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_threading_state: Option<String>,
    /// RFC 3339 creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// RFC 3339 time of the last message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_time: Option<String>,
}

impl Space {
    /// Display name, falling back to the resource name.
    #[must_use]
    pub fn title(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }
}

/// Thread reference on a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thread {
    /// Resource name (`spaces/{space}/threads/{thread}`).
    pub name: String,
    /// Client-assigned thread key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_key: Option<String>,
}

/// A message in a space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    /// Resource name (`spaces/{space}/messages/{message}`).
    pub name: String,
    /// Sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<User>,
    /// RFC 3339 creation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Plain-text body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Thread the message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<Thread>,
}

/// A membership of a user or group in a space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Membership {
    /// Resource name (`spaces/{space}/members/{member}`).
    pub name: String,
    /// `JOINED`, `INVITED`, or `NOT_A_MEMBER`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// `ROLE_MEMBER` or `ROLE_MANAGER`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// The member, when it is a user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<User>,
    /// RFC 3339 join time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

/// Emoji used in a reaction: either unicode or a custom emoji.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Emoji {
    /// Unicode emoji.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unicode: Option<String>,
    /// Custom emoji.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_emoji: Option<CustomEmoji>,
}

impl Emoji {
    /// Unicode character, or `:shortcode:` for custom emoji.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.unicode, &self.custom_emoji) {
            (Some(unicode), _) => unicode.clone(),
            (None, Some(custom)) => custom
                .emoji_name
                .clone()
                .unwrap_or_else(|| custom.name.clone()),
            (None, None) => String::new(),
        }
    }
}

/// A reaction on a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reaction {
    /// Resource name (`spaces/{space}/messages/{message}/reactions/{reaction}`).
    pub name: String,
    /// Who reacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Which emoji.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<Emoji>,
}

/// An organization's custom emoji.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomEmoji {
    /// Resource name (`customEmojis/{emoji}`).
    pub name: String,
    /// Server-assigned ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// `:shortcode:`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji_name: Option<String>,
    /// Image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_image_uri: Option<String>,
}

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token for the next page, absent on the last page.
    pub next_page_token: Option<String>,
}

impl<T: DeserializeOwned> Page<T> {
    /// Decode a list response whose items live under `key` (e.g. `spaces`).
    ///
    /// A missing key is an empty page; the API omits empty arrays.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the items do not match `T`.
    pub fn from_value(value: &Value, key: &str) -> Result<Self, CoreError> {
        let items = match value.get(key) {
            Some(items) => serde_json::from_value(items.clone())
                .map_err(|e| CoreError::Serialization(format!("decoding {key}: {e}")))?,
            None => Vec::new(),
        };
        Ok(Self {
            items,
            next_page_token: next_page_token(value).map(str::to_string),
        })
    }
}

/// `nextPageToken` of a list response, if present and non-empty.
#[must_use]
pub fn next_page_token(value: &Value) -> Option<&str> {
    value
        .get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
}
