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
use crate::broadcast;
use crate::db::{Database, TenantDb};

/// Send a draft or scheduled broadcast immediately. The response carries
/// the per-batch accounting so partial failures are visible to the
/// operator; re-triggering after a failure is a manual action.
pub async fn send_message(
    State(db): State<Arc<Database>>,
    Path((channel_id, message_id)): Path<(i32, i32)>,
    headers: HeaderMap,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let message = match tenant.message(message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => return err(StatusCode::NOT_FOUND, "message not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    match broadcast::send_now(&db, message.id).await {
        Ok(outcome) => {
            let mut conn = match db.get_connection().await {
                Ok(conn) => conn,
                Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
            record_activity(
                &mut conn,
                channel_id,
                actor_from(&headers),
                "message.send",
                json!({
                    "message_id": message.id,
                    "batches": outcome.batches,
                    "success_count": outcome.success,
                    "failure_count": outcome.failure,
                }),
            )
            .await;
            ok(json!({
                "status": outcome.final_status(),
                "batches": outcome.batches,
                "success_count": outcome.success,
                "failure_count": outcome.failure,
            }))
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
