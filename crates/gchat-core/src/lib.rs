//! Core library for gchat - a Google Chat command-line client.
//!
//! This crate provides:
//! - Configuration loading and management
//! - XDG-compliant path resolution
//! - Schema and example config generation
//! - OAuth2 login, token storage, and automatic token refresh
//! - A Chat REST client with typed resource services
//! - Common types and error handling

pub mod chat;
pub mod config;
pub mod error;
pub mod paths;
pub mod schema;

pub use chat::{
    ApiError, AuthenticatedTransport, AuthorizationFlow, ChatClient, CredentialResolver,
    Credentials, LoginError, OAuthEndpoints, Token, TokenStore,
};
pub use config::{
    ApiConfig, AppConfig, AuthConfig, LogLevel, LoggingConfig, PathsConfig, RuntimeConfig,
};
pub use error::{CoreError, ErrorKind, Result};
pub use paths::{AppPaths, default_data_dir, default_state_dir};
pub use schema::{generate_example_config, generate_schema, write_generated_files};

/// Application name used for config directories and environment prefix.
pub const APP_NAME: &str = "gchat";

/// Returns the environment variable prefix for this application.
#[must_use]
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
