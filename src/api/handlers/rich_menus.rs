// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::json;
use std::sync::Arc;

use crate::api::handlers::{actor_from, record_activity};
use crate::api::routes::{err, ok, JsonResponse};
use crate::db::{Database, TenantDb};
use crate::line::LineClient;
use crate::menus;
use crate::schema::rich_menus;

/// Register a stored menu with the gateway (create + image upload). The
/// external id is persisted only after both remote calls succeed.
pub async fn register_menu(
    State(db): State<Arc<Database>>,
    Path((channel_id, menu_id)): Path<(i32, i32)>,
    headers: HeaderMap,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let channel = match tenant.channel().await {
        Ok(Some(channel)) => channel,
        Ok(None) => return err(StatusCode::NOT_FOUND, "channel not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let menu = match tenant.rich_menu(menu_id).await {
        Ok(Some(menu)) => menu,
        Ok(None) => return err(StatusCode::NOT_FOUND, "rich menu not found"),
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

    match menus::register_rich_menu(&mut conn, &gateway, &menu).await {
        Ok(external_id) => {
            record_activity(
                &mut conn,
                channel_id,
                actor_from(&headers),
                "rich_menu.register",
                json!({ "menu_id": menu.id, "line_rich_menu_id": external_id }),
            )
            .await;
            ok(json!({ "line_rich_menu_id": external_id }))
        }
        Err(e) => err(
            StatusCode::BAD_GATEWAY,
            format!("rich menu registration failed: {}", e),
        ),
    }
}

/// Delete a menu: remove it from the gateway, clear every local reference,
/// then drop the row.
pub async fn delete_menu(
    State(db): State<Arc<Database>>,
    Path((channel_id, menu_id)): Path<(i32, i32)>,
    headers: HeaderMap,
) -> JsonResponse {
    let tenant = TenantDb::new(db.clone(), channel_id);
    let channel = match tenant.channel().await {
        Ok(Some(channel)) => channel,
        Ok(None) => return err(StatusCode::NOT_FOUND, "channel not found"),
        Err(e) => return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let menu = match tenant.rich_menu(menu_id).await {
        Ok(Some(menu)) => menu,
        Ok(None) => return err(StatusCode::NOT_FOUND, "rich menu not found"),
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

    if let Err(e) = menus::unregister_rich_menu(&mut conn, &gateway, &menu).await {
        return err(
            StatusCode::BAD_GATEWAY,
            format!("rich menu removal failed: {}", e),
        );
    }
    if let Err(e) = diesel::delete(rich_menus::table.find(menu.id))
        .execute(&mut conn)
        .await
    {
        return err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    record_activity(
        &mut conn,
        channel_id,
        actor_from(&headers),
        "rich_menu.delete",
        json!({ "menu_id": menu.id }),
    )
    .await;
    ok(json!({ "deleted": true }))
}
