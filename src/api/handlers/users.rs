// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::json;
use std::sync::Arc;

use crate::api::handlers::{actor_from, record_activity};
use crate::api::routes::{err, ok, JsonResponse};
use crate::config::Config;
use crate::contacts;
use crate::db::{Database, TenantDb};
use crate::line::LineClient;

/// Assign a tag to a user. Fires tag-triggered scenarios and re-resolves
/// the user's rich menu; a failed menu switch does not fail the request.
pub async fn assign_tag(
    State(db): State<Arc<Database>>,
    Path((channel_id, user_id, tag_id)): Path<(i32, i32, i32)>,
    headers: HeaderMap,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let channel = match tenant.channel().await {
        Ok(Some(channel)) => channel,
        Ok(None) => return err(StatusCode::NOT_FOUND, "channel not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let user = match tenant.line_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return err(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if tenant.tag(tag_id).await.ok().flatten().is_none() {
        return err(StatusCode::NOT_FOUND, "tag not found");
    }

    let gateway = match LineClient::for_channel(&channel) {
        Ok(gateway) => gateway,
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

    match contacts::assign_tag(&mut conn, &gateway, &channel, user.id, tag_id, tz).await {
        Ok(newly_assigned) => {
            record_activity(
                &mut conn,
                channel_id,
                actor_from(&headers),
                "tag.assign",
                json!({ "user_id": user.id, "tag_id": tag_id, "newly_assigned": newly_assigned }),
            )
            .await;
            ok(json!({ "assigned": newly_assigned }))
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Remove a tag from a user and re-resolve their rich menu.
pub async fn unassign_tag(
    State(db): State<Arc<Database>>,
    Path((channel_id, user_id, tag_id)): Path<(i32, i32, i32)>,
    headers: HeaderMap,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let channel = match tenant.channel().await {
        Ok(Some(channel)) => channel,
        Ok(None) => return err(StatusCode::NOT_FOUND, "channel not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let user = match tenant.line_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return err(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let gateway = match LineClient::for_channel(&channel) {
        Ok(gateway) => gateway,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let mut conn = match db.get_connection().await {
        Ok(conn) => conn,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    match contacts::unassign_tag(&mut conn, &gateway, user.id, tag_id).await {
        Ok(removed) => {
            record_activity(
                &mut conn,
                channel_id,
                actor_from(&headers),
                "tag.unassign",
                json!({ "user_id": user.id, "tag_id": tag_id, "removed": removed }),
            )
            .await;
            ok(json!({ "removed": removed }))
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Delete a user and all dependent rows (executions, tags, chat history).
pub async fn delete_user(
    State(db): State<Arc<Database>>,
    Path((channel_id, user_id)): Path<(i32, i32)>,
    headers: HeaderMap,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let user = match tenant.line_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return err(StatusCode::NOT_FOUND, "user not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let mut conn = match db.get_connection().await {
        Ok(conn) => conn,
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    match contacts::delete_user(&mut conn, user.id).await {
        Ok(()) => {
            record_activity(
                &mut conn,
                channel_id,
                actor_from(&headers),
                "user.delete",
                json!({ "user_id": user.id, "line_user_id": user.line_user_id }),
            )
            .await;
            ok(json!({ "deleted": true }))
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
