// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use diesel::prelude::*;
use diesel::OptionalExtension;
use diesel_async::RunQueryDsl;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::Database;
use crate::line::events::WebhookPayload;
use crate::line::{verify_signature, LineClient};
use crate::models::Channel;
use crate::schema::channels;
use crate::webhook;

const SIGNATURE_HEADER: &str = "x-line-signature";

/// Inbound platform webhook, one endpoint per channel routed by the
/// external channel id in the path.
///
/// Signature verification runs over the raw body bytes before any JSON
/// parsing. The response is 200 whenever the batch was accepted, even if
/// individual events logged internal errors — telling the platform to
/// retry an accepted batch would duplicate side effects.
pub async fn receive_webhook(
    State(db): State<Arc<Database>>,
    Path(line_channel_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(signature) => signature.to_string(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "missing signature header" })),
            )
        }
    };

    let mut conn = match db.get_connection().await {
        Ok(conn) => conn,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Database error: {}", e) })),
            )
        }
    };
    let channel = match channels::table
        .filter(channels::line_channel_id.eq(&line_channel_id))
        .first::<Channel>(&mut conn)
        .await
        .optional()
    {
        Ok(Some(channel)) => channel,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown channel" })),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Database error: {}", e) })),
            )
        }
    };
    drop(conn);

    if !verify_signature(&body, &signature, &channel.channel_secret) {
        warn!("webhook signature mismatch for channel {}", channel.id);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        );
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("malformed payload: {}", e) })),
            )
        }
    };

    let gateway = match LineClient::for_channel(&channel) {
        Ok(gateway) => gateway,
        Err(e) => {
            warn!("channel {} has unusable credentials: {}", channel.id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "channel credentials unusable" })),
            );
        }
    };

    let event_count = payload.events.len();
    let handled = webhook::process_webhook(&db, &gateway, &channel, payload).await;
    info!(
        "webhook for channel {}: {}/{} events handled",
        channel.id, handled, event_count
    );

    // Relay after primary processing; forwarding failures never surface here
    if let Some(forward_url) = channel.webhook_forward_url.clone() {
        webhook::relay_webhook(forward_url, body.to_vec(), signature);
    }

    (StatusCode::OK, Json(json!({ "success": true })))
}
