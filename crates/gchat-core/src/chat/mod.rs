//! Google Chat API access.
//!
//! This module provides:
//! - OAuth2 client credential resolution and the browser login flow
//! - File-backed token storage
//! - An authenticated transport with automatic token refresh
//! - A generic REST invoker plus per-resource services
//! - Structured API errors with remediation hints

pub mod api_error;
pub mod auth;
pub mod client;
pub mod credentials;
pub mod models;
pub mod resources;
pub mod storage;
pub mod token;
pub mod transport;

pub use api_error::{ApiError, ApiErrorKind, ApiStatus, ErrorDetail, HelpLink};
pub use auth::{AuthorizationFlow, FlowState, LoginError, OAuthEndpoints};
pub use client::{ChatClient, Download, PageRequest, Query, build_http_client, normalize_name};
pub use credentials::{CredentialResolver, Credentials};
pub use models::{CustomEmoji, Membership, Message, Page, Reaction, Space, User};
pub use resources::{CreateMessage, ListMembers, ListMessages, SearchSpaces};
pub use storage::TokenStore;
pub use token::Token;
pub use transport::AuthenticatedTransport;
