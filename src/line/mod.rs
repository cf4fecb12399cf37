// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod events;
pub mod messages;
pub mod signature;

pub use client::LineClient;
pub use signature::verify_signature;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the messaging gateway. Callers treat transport
/// failures and timeouts identically to explicit API errors: the delivery
/// failed, and the remote side may or may not have seen the request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("LINE API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid gateway input: {0}")]
    InvalidInput(String),
}

/// Live profile of a platform end-user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineProfile {
    pub display_name: String,
    pub picture_url: Option<String>,
    pub status_message: Option<String>,
}

/// The capabilities this system requires from the LINE Messaging API.
/// `LineClient` is the production implementation; tests substitute mocks.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<LineProfile, GatewayError>;

    async fn push(&self, user_id: &str, wire_messages: &[Value]) -> Result<(), GatewayError>;

    async fn multicast(&self, user_ids: &[String], wire_messages: &[Value])
        -> Result<(), GatewayError>;

    /// Register a menu definition; returns the platform-assigned menu id.
    async fn create_rich_menu(&self, definition: &Value) -> Result<String, GatewayError>;

    async fn upload_rich_menu_image(
        &self,
        menu_id: &str,
        image: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError>;

    async fn delete_rich_menu(&self, menu_id: &str) -> Result<(), GatewayError>;

    async fn link_menu_to_user(&self, user_id: &str, menu_id: &str) -> Result<(), GatewayError>;

    async fn unlink_menu_from_user(&self, user_id: &str) -> Result<(), GatewayError>;

    /// Set the platform-wide default menu served to users with no explicit
    /// link. Distinct from `link_menu_to_user`.
    async fn set_platform_default_menu(&self, menu_id: &str) -> Result<(), GatewayError>;
}
