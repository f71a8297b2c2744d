//! OAuth2 client credential resolution.
//!
//! Precedence: explicit value (CLI flag) > configured value (config file or
//! `GCHAT__AUTH__*` environment) > the pair compiled into the binary.

use crate::CoreError;
use crate::config::AuthConfig;

/// Client ID baked in at build time via `GCHAT_DEFAULT_CLIENT_ID`.
pub const DEFAULT_CLIENT_ID: &str = match option_env!("GCHAT_DEFAULT_CLIENT_ID") {
    Some(id) => id,
    None => "",
};

/// Client secret baked in at build time via `GCHAT_DEFAULT_CLIENT_SECRET`.
pub const DEFAULT_CLIENT_SECRET: &str = match option_env!("GCHAT_DEFAULT_CLIENT_SECRET") {
    Some(secret) => secret,
    None => "",
};

/// A resolved OAuth2 client identity. Both fields are non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Validate and build a credential pair.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCredentials`] if either value is empty.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self, CoreError> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();

        if client_id.is_empty() {
            return Err(CoreError::InvalidCredentials(
                "client ID is empty - pass --client-id, set GCHAT__AUTH__CLIENT_ID, or add auth.client_id to the config file".to_string(),
            ));
        }
        if client_secret.is_empty() {
            return Err(CoreError::InvalidCredentials(
                "client secret is empty - pass --client-secret, set GCHAT__AUTH__CLIENT_SECRET, or add auth.client_secret to the config file".to_string(),
            ));
        }

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// OAuth2 client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

/// Resolves credentials from explicit values, configuration, then built-in defaults.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    configured_id: Option<String>,
    configured_secret: Option<String>,
    default_id: String,
    default_secret: String,
}

impl CredentialResolver {
    /// Resolver over the loaded `[auth]` configuration and the compiled-in defaults.
    #[must_use]
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            configured_id: auth.client_id.clone(),
            configured_secret: auth.client_secret.clone(),
            default_id: DEFAULT_CLIENT_ID.to_string(),
            default_secret: DEFAULT_CLIENT_SECRET.to_string(),
        }
    }

    /// Replace the built-in fallback pair.
    #[must_use]
    pub fn with_defaults(mut self, client_id: &str, client_secret: &str) -> Self {
        self.default_id = client_id.to_string();
        self.default_secret = client_secret.to_string();
        self
    }

    /// Resolve the credential pair. Each field falls back independently.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCredentials`] if a field is still empty
    /// after every fallback.
    pub fn resolve(
        &self,
        explicit_id: Option<&str>,
        explicit_secret: Option<&str>,
    ) -> Result<Credentials, CoreError> {
        let client_id = pick(explicit_id, self.configured_id.as_deref(), &self.default_id);
        let client_secret = pick(
            explicit_secret,
            self.configured_secret.as_deref(),
            &self.default_secret,
        );
        Credentials::new(client_id, client_secret)
    }
}

fn pick<'a>(explicit: Option<&'a str>, configured: Option<&'a str>, default: &'a str) -> &'a str {
    [explicit, configured]
        .into_iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(id: Option<&str>, secret: Option<&str>) -> CredentialResolver {
        let auth = AuthConfig {
            client_id: id.map(str::to_string),
            client_secret: secret.map(str::to_string),
            ..AuthConfig::default()
        };
        CredentialResolver::new(&auth).with_defaults("builtin-id", "builtin-secret")
    }

    #[test]
    fn explicit_beats_config_and_default() {
        let creds = resolver(Some("cfg-id"), Some("cfg-secret"))
            .resolve(Some("flag-id"), Some("flag-secret"))
            .expect("resolve");
        assert_eq!(creds.client_id(), "flag-id");
        assert_eq!(creds.client_secret(), "flag-secret");
    }

    #[test]
    fn empty_explicit_falls_back_to_config() {
        let creds = resolver(Some("cfg-id"), Some("cfg-secret"))
            .resolve(Some(""), None)
            .expect("resolve");
        assert_eq!(creds.client_id(), "cfg-id");
        assert_eq!(creds.client_secret(), "cfg-secret");
    }

    #[test]
    fn fields_fall_back_independently() {
        let creds = resolver(Some("cfg-id"), None)
            .resolve(None, None)
            .expect("resolve");
        assert_eq!(creds.client_id(), "cfg-id");
        assert_eq!(creds.client_secret(), "builtin-secret");
    }

    #[test]
    fn all_empty_is_invalid() {
        let err = CredentialResolver::new(&AuthConfig::default())
            .with_defaults("", "")
            .resolve(None, None)
            .expect_err("should fail");
        assert!(matches!(err, CoreError::InvalidCredentials(_)));
    }

    #[test]
    fn debug_redacts_secret() {
        let creds = Credentials::new("id", "very-secret").expect("creds");
        assert!(!format!("{creds:?}").contains("very-secret"));
    }
}
