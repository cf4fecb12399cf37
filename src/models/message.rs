// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::messages;

// Broadcast status machine: draft|scheduled -> sending -> sent|failed
pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_SENDING: &str = "sending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

/// One outbound broadcast campaign. `tag_ids` is the recipient filter
/// (empty means every non-blocked user of the channel).
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub id: i32,
    pub channel_id: i32,
    pub title: String,
    pub contents: serde_json::Value,
    pub status: String,
    pub tag_ids: Vec<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recipient_count: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One block of a broadcast or step message. The variants mirror what the
/// console lets operators compose; `Image` carries the tappable surface, so
/// the optional custom-action bundle rides there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        original_content_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview_image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_action: Option<CustomAction>,
    },
    Video {
        original_content_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview_image_url: Option<String>,
    },
}

/// Action bundle executed when a user taps an interactive image block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAction {
    #[serde(default)]
    pub tag_ids: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl Message {
    /// Deserialize the stored content-block list.
    pub fn content_blocks(&self) -> Result<Vec<ContentBlock>> {
        serde_json::from_value(self.contents.clone())
            .with_context(|| format!("message {} has malformed contents", self.id))
    }
}

pub fn content_blocks_from(value: &serde_json::Value) -> Result<Vec<ContentBlock>> {
    serde_json::from_value(value.clone()).context("malformed content blocks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_round_trips_through_tagged_json() {
        let blocks = vec![
            ContentBlock::Text {
                text: "hello".to_string(),
            },
            ContentBlock::Image {
                original_content_url: "https://cdn.example.com/a.png".to_string(),
                preview_image_url: None,
                link_url: Some("https://example.com".to_string()),
                custom_action: Some(CustomAction {
                    tag_ids: vec![3],
                    scenario_id: None,
                    reply_text: Some("thanks {name}".to_string()),
                    redirect_url: None,
                }),
            },
        ];
        let value = serde_json::to_value(&blocks).unwrap();
        assert_eq!(value[0]["type"], "text");
        assert_eq!(value[1]["type"], "image");
        let parsed = content_blocks_from(&value).unwrap();
        assert_eq!(parsed, blocks);
    }

    #[test]
    fn unknown_block_type_is_rejected() {
        let value = serde_json::json!([{ "type": "carousel", "items": [] }]);
        assert!(content_blocks_from(&value).is_err());
    }
}
