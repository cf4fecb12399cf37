// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scheduler-triggered sweep endpoints.
//!
//! Each is idempotent, bearer-token authenticated, processes a bounded
//! page of due work, and reports how many items it moved. The external
//! scheduler invokes them on a fixed interval.

use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::broadcast;
use crate::config::Config;
use crate::db::Database;
use crate::menus;
use crate::steps;

fn scheduler_authorized(headers: &HeaderMap) -> bool {
    let token = &Config::get().sweeps.scheduler_token;
    if token.is_empty() {
        // No token configured: sweeps are disabled rather than open
        return false;
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|supplied| supplied == token)
        .unwrap_or(false)
}

macro_rules! require_scheduler_auth {
    ($headers:expr) => {
        if !scheduler_authorized($headers) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid scheduler token" })),
            );
        }
    };
}

/// Deliver due scheduled broadcasts.
pub async fn run_broadcast_sweep(
    State(db): State<Arc<Database>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    require_scheduler_auth!(&headers);
    match broadcast::sweep_scheduled(&db, Config::get().sweeps.page_size).await {
        Ok(processed) => (StatusCode::OK, Json(json!({ "processed": processed }))),
        Err(e) => {
            error!("broadcast sweep failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Advance due step executions.
pub async fn run_step_sweep(
    State(db): State<Arc<Database>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    require_scheduler_auth!(&headers);
    match steps::advance_due_executions(&db, Config::get().sweeps.page_size).await {
        Ok(processed) => (StatusCode::OK, Json(json!({ "processed": processed }))),
        Err(e) => {
            error!("step sweep failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// Activate and deactivate display-window menus.
pub async fn run_rich_menu_sweep(
    State(db): State<Arc<Database>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    require_scheduler_auth!(&headers);
    match menus::sweep_display_windows(&db, Config::get().sweeps.page_size).await {
        Ok(processed) => (StatusCode::OK, Json(json!({ "processed": processed }))),
        Err(e) => {
            error!("rich menu sweep failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}
