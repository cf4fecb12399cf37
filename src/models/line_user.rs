// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::line_users;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = line_users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LineUser {
    pub id: i32,
    pub channel_id: i32,
    pub line_user_id: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub status_message: Option<String>,
    pub is_blocked: bool,
    pub internal_name: Option<String>,
    pub current_rich_menu_id: Option<i32>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_text: Option<String>,
    pub unread_count: i32,
    pub followed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = line_users)]
pub struct NewLineUser {
    pub channel_id: i32,
    pub line_user_id: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub status_message: Option<String>,
    pub followed_at: DateTime<Utc>,
}

/// Profile fields refreshed from the gateway on follow / implicit follow-sync.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = line_users)]
pub struct ProfileSync {
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub status_message: Option<String>,
    pub is_blocked: bool,
}
