// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod health;
pub mod metrics;
pub mod webhook;
pub mod sweeps;
pub mod users;
pub mod scenarios;
pub mod messages;
pub mod rich_menus;

use axum::http::HeaderMap;
use diesel_async::RunQueryDsl;
use tracing::warn;

use crate::db::DbConnection;
use crate::models::activity_log::NewActivityLog;
use crate::schema::activity_logs;

/// Acting operator for audit records. Session handling is owned by the
/// console frontend; it forwards the member identity in a header.
pub(crate) fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get("x-operator")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("operator")
        .to_string()
}

/// Append an audit record; failures are logged, never surfaced.
pub(crate) async fn record_activity(
    conn: &mut DbConnection,
    channel_id: i32,
    actor: String,
    action: &str,
    detail: serde_json::Value,
) {
    let entry = NewActivityLog {
        channel_id,
        actor,
        action: action.to_string(),
        detail,
    };
    if let Err(e) = diesel::insert_into(activity_logs::table)
        .values(&entry)
        .execute(conn)
        .await
    {
        warn!("failed to record activity '{}': {}", action, e);
    }
}
