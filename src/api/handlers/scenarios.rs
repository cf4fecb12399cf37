// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::api::handlers::{actor_from, record_activity};
use crate::api::routes::{err, ok, JsonResponse};
use crate::config::Config;
use crate::db::{Database, TenantDb};
use crate::schema::{line_user_tags, line_users};
use crate::steps;

#[derive(Debug, Deserialize)]
pub struct ManualStartRequest {
    /// Explicit user set to start; validated against the channel
    #[serde(default)]
    pub user_ids: Vec<i32>,
    /// Or: start every member of this tag
    #[serde(default)]
    pub tag_id: Option<i32>,
    /// 1-based starting step, defaults to the beginning
    #[serde(default)]
    pub from_step: Option<i32>,
}

/// Operator bulk start of a scenario against an explicit user set or a
/// tag's member set. Users with an active execution are skipped and
/// reported, not failed.
pub async fn manual_start(
    State(db): State<Arc<Database>>,
    Path((channel_id, scenario_id)): Path<(i32, i32)>,
    headers: HeaderMap,
    Json(request): Json<ManualStartRequest>,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let scenario = match tenant.scenario(scenario_id).await {
        Ok(Some(scenario)) => scenario,
        Ok(None) => return err(StatusCode::NOT_FOUND, "scenario not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let tz = match Config::get().scheduler_timezone() {
        Ok(tz) => tz,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let mut conn = match db.get_connection().await {
        Ok(conn) => conn,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    // Resolve the target set, always restricted to this channel's users
    let mut target_ids: Vec<i32> = Vec::new();
    if !request.user_ids.is_empty() {
        let valid: Vec<i32> = match line_users::table
            .filter(line_users::channel_id.eq(channel_id))
            .filter(line_users::id.eq_any(&request.user_ids))
            .select(line_users::id)
            .load(&mut conn)
            .await
        {
            Ok(ids) => ids,
            Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        target_ids.extend(valid);
    }
    if let Some(tag_id) = request.tag_id {
        if tenant.tag(tag_id).await.ok().flatten().is_none() {
            return err(StatusCode::NOT_FOUND, "tag not found");
        }
        let members: Vec<i32> = match line_user_tags::table
            .filter(line_user_tags::tag_id.eq(tag_id))
            .select(line_user_tags::line_user_id)
            .load(&mut conn)
            .await
        {
            Ok(ids) => ids,
            Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        target_ids.extend(members);
    }
    target_ids.sort_unstable();
    target_ids.dedup();

    if target_ids.is_empty() {
        return err(StatusCode::BAD_REQUEST, "no target users resolved");
    }

    let from_step = request.from_step.unwrap_or(1).max(1);
    match steps::manual_start(&mut conn, &scenario, &target_ids, from_step, tz).await {
        Ok(report) => {
            record_activity(
                &mut conn,
                channel_id,
                actor_from(&headers),
                "scenario.manual_start",
                json!({
                    "scenario_id": scenario.id,
                    "from_step": from_step,
                    "created": report.created,
                    "skipped": report.skipped,
                }),
            )
            .await;
            ok(report)
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
