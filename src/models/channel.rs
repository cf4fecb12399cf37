// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::channels;

/// One managed LINE official account. The `line_channel_id` is the webhook
/// routing key; `channel_secret` and `access_token` are required for any
/// outbound gateway call.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = channels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Channel {
    pub id: i32,
    pub line_channel_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub channel_secret: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub default_rich_menu_id: Option<i32>,
    pub follow_tag_ids: Vec<i32>,
    pub webhook_forward_url: Option<String>,
    #[serde(skip_serializing)]
    pub access_password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

