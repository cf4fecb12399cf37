// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{line_user_tags, tags};

/// A channel-scoped label. `priority` is the total order key used by the
/// rich-menu resolution engine when several of a user's tags link menus.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = tags)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Tag {
    pub id: i32,
    pub channel_id: i32,
    pub name: String,
    pub color: String,
    pub priority: i32,
    pub rich_menu_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = line_user_tags)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LineUserTag {
    pub id: i32,
    pub line_user_id: i32,
    pub tag_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = line_user_tags)]
pub struct NewLineUserTag {
    pub line_user_id: i32,
    pub tag_id: i32,
}
