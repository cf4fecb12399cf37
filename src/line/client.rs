// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::config::Config;
use crate::line::{GatewayError, LineProfile, MessagingGateway};
use crate::models::Channel;

// Multicast recipient cap imposed by the platform
pub const MULTICAST_CAP: usize = 500;

/// Reqwest-backed LINE Messaging API client, authenticated with one
/// channel's long-lived access token. Rich-menu image content goes through
/// the separate blob API host.
#[derive(Debug, Clone)]
pub struct LineClient {
    client: reqwest::Client,
    api_base: String,
    blob_base: String,
}

impl LineClient {
    pub fn new(
        api_base: impl Into<String>,
        blob_base: impl Into<String>,
        access_token: &str,
    ) -> Result<Self, GatewayError> {
        if access_token.trim().is_empty() {
            return Err(GatewayError::InvalidInput(
                "channel access token is empty".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", access_token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| GatewayError::InvalidInput(format!("invalid access token: {}", e)))?,
        );

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        let api_base: String = api_base.into();
        let blob_base: String = blob_base.into();
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            blob_base: blob_base.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client for one channel using the configured API hosts.
    pub fn for_channel(channel: &Channel) -> Result<Self, GatewayError> {
        let config = Config::get();
        Self::new(
            &config.line.api_base,
            &config.line.blob_api_base,
            &channel.access_token,
        )
    }

    async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessagingGateway for LineClient {
    async fn get_profile(&self, user_id: &str) -> Result<LineProfile, GatewayError> {
        let url = format!("{}/v2/bot/profile/{}", self.api_base, user_id);
        let response = Self::expect_ok(self.client.get(&url).send().await?).await?;
        Ok(response.json::<LineProfile>().await?)
    }

    async fn push(&self, user_id: &str, wire_messages: &[Value]) -> Result<(), GatewayError> {
        let url = format!("{}/v2/bot/message/push", self.api_base);
        let body = json!({ "to": user_id, "messages": wire_messages });
        Self::expect_ok(self.client.post(&url).json(&body).send().await?).await?;
        Ok(())
    }

    async fn multicast(
        &self,
        user_ids: &[String],
        wire_messages: &[Value],
    ) -> Result<(), GatewayError> {
        if user_ids.len() > MULTICAST_CAP {
            return Err(GatewayError::InvalidInput(format!(
                "multicast recipient list of {} exceeds the cap of {}",
                user_ids.len(),
                MULTICAST_CAP
            )));
        }
        let url = format!("{}/v2/bot/message/multicast", self.api_base);
        let body = json!({ "to": user_ids, "messages": wire_messages });
        Self::expect_ok(self.client.post(&url).json(&body).send().await?).await?;
        Ok(())
    }

    async fn create_rich_menu(&self, definition: &Value) -> Result<String, GatewayError> {
        let url = format!("{}/v2/bot/richmenu", self.api_base);
        let response =
            Self::expect_ok(self.client.post(&url).json(definition).send().await?).await?;
        let body: Value = response.json().await?;
        body.get("richMenuId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidInput(
                "rich menu registration response carried no richMenuId".to_string(),
            ))
    }

    async fn upload_rich_menu_image(
        &self,
        menu_id: &str,
        image: Vec<u8>,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/v2/bot/richmenu/{}/content", self.blob_base, menu_id);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, content_type)
            .body(image)
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn delete_rich_menu(&self, menu_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/v2/bot/richmenu/{}", self.api_base, menu_id);
        Self::expect_ok(self.client.delete(&url).send().await?).await?;
        Ok(())
    }

    async fn link_menu_to_user(&self, user_id: &str, menu_id: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/v2/bot/user/{}/richmenu/{}",
            self.api_base, user_id, menu_id
        );
        Self::expect_ok(self.client.post(&url).send().await?).await?;
        Ok(())
    }

    async fn unlink_menu_from_user(&self, user_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/v2/bot/user/{}/richmenu", self.api_base, user_id);
        Self::expect_ok(self.client.delete(&url).send().await?).await?;
        Ok(())
    }

    async fn set_platform_default_menu(&self, menu_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/v2/bot/user/all/richmenu/{}", self.api_base, menu_id);
        Self::expect_ok(self.client.post(&url).send().await?).await?;
        Ok(())
    }
}
