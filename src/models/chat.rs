// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::chat_messages;

pub const DIRECTION_INCOMING: &str = "incoming";
pub const DIRECTION_OUTGOING: &str = "outgoing";

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = chat_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChatMessage {
    pub id: i32,
    pub line_user_id: i32,
    pub direction: String,
    pub message_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage {
    pub line_user_id: i32,
    pub direction: String,
    pub message_type: String,
    pub content: String,
}
