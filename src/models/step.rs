// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::message::ContentBlock;
use crate::schema::{step_executions, step_messages, step_scenarios};

pub const TRIGGER_FOLLOW: &str = "follow";
pub const TRIGGER_TAG_ASSIGNED: &str = "tag_assigned";

pub const EXECUTION_ACTIVE: &str = "active";
pub const EXECUTION_COMPLETED: &str = "completed";

/// A drip-campaign definition owned by one channel.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = step_scenarios)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StepScenario {
    pub id: i32,
    pub channel_id: i32,
    pub name: String,
    pub trigger_type: String,
    pub trigger_tag_id: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One step within a scenario; `step_order` is 1-based and unique per
/// scenario. `send_hour`/`send_minute` snap the fire time to a local
/// time-of-day, `delay_minutes` alone fires at an exact offset.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = step_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StepMessage {
    pub id: i32,
    pub scenario_id: i32,
    pub step_order: i32,
    pub delay_minutes: i32,
    pub send_hour: Option<i32>,
    pub send_minute: Option<i32>,
    pub contents: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StepMessage {
    pub fn content_blocks(&self) -> Result<Vec<ContentBlock>> {
        serde_json::from_value(self.contents.clone())
            .with_context(|| format!("step message {} has malformed contents", self.id))
    }
}

/// One user's progress through one scenario. At most one active row per
/// (scenario, user) pair; enforced by a partial unique index and re-checked
/// before every insert.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = step_executions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StepExecution {
    pub id: i32,
    pub scenario_id: i32,
    pub line_user_id: i32,
    pub current_step: i32,
    pub next_send_at: DateTime<Utc>,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = step_executions)]
pub struct NewStepExecution {
    pub scenario_id: i32,
    pub line_user_id: i32,
    pub current_step: i32,
    pub next_send_at: DateTime<Utc>,
    pub status: String,
}
