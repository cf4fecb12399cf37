// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

//! Contact management: user upserts, tag assignment, and teardown.
//!
//! Tag assignment is the fan-in point for two engines: every assign may
//! start tag-triggered scenarios and must re-resolve the user's rich menu,
//! whether the assign came from an operator, a postback action, or a
//! follow. Menu switching failures are isolated here so the assignment
//! itself always commits.

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::OptionalExtension;
use diesel_async::RunQueryDsl;
use tracing::{info, warn};

use crate::db::DbConnection;
use crate::line::{MessagingGateway, LineProfile};
use crate::menus;
use crate::models::line_user::NewLineUser;
use crate::models::tag::NewLineUserTag;
use crate::models::{Channel, LineUser};
use crate::schema::{chat_messages, line_user_tags, line_users, step_executions, tags};
use crate::steps;

/// Look the user up by platform id, creating the row on first contact.
/// Real-world accounts can message without a clean follow event, so the
/// message path treats an unknown sender as an implicit follow-sync; the
/// profile is best-effort.
pub async fn ensure_user(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    channel: &Channel,
    platform_user_id: &str,
) -> Result<LineUser> {
    let existing = line_users::table
        .filter(line_users::channel_id.eq(channel.id))
        .filter(line_users::line_user_id.eq(platform_user_id))
        .first::<LineUser>(conn)
        .await
        .optional()?;
    if let Some(user) = existing {
        return Ok(user);
    }

    let profile: Option<LineProfile> = match gateway.get_profile(platform_user_id).await {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!("profile fetch for {} failed, creating bare user: {}", platform_user_id, e);
            None
        }
    };

    let new_user = NewLineUser {
        channel_id: channel.id,
        line_user_id: platform_user_id.to_string(),
        display_name: profile.as_ref().map(|p| p.display_name.clone()),
        picture_url: profile.as_ref().and_then(|p| p.picture_url.clone()),
        status_message: profile.as_ref().and_then(|p| p.status_message.clone()),
        followed_at: Utc::now(),
    };
    let user = diesel::insert_into(line_users::table)
        .values(&new_user)
        .get_result::<LineUser>(conn)
        .await?;
    info!("created user {} for channel {}", user.id, channel.id);
    Ok(user)
}

/// Idempotently assign a tag, then fire the downstream effects: matching
/// tag-triggered scenarios (only on a fresh assignment) and rich-menu
/// re-resolution (always recomputed from current state).
///
/// Returns whether the assignment was new.
pub async fn assign_tag(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    channel: &Channel,
    line_user_id: i32,
    tag_id: i32,
    tz: Tz,
) -> Result<bool> {
    let tag_in_channel: Option<i32> = tags::table
        .find(tag_id)
        .filter(tags::channel_id.eq(channel.id))
        .select(tags::id)
        .first(conn)
        .await
        .optional()?;
    if tag_in_channel.is_none() {
        warn!("tag {} does not exist in channel {}, skipping assignment", tag_id, channel.id);
        return Ok(false);
    }

    let inserted = diesel::insert_into(line_user_tags::table)
        .values(&NewLineUserTag {
            line_user_id,
            tag_id,
        })
        .on_conflict((line_user_tags::line_user_id, line_user_tags::tag_id))
        .do_nothing()
        .execute(conn)
        .await?;
    let newly_assigned = inserted > 0;

    if newly_assigned {
        steps::trigger_tag_scenarios(conn, channel.id, line_user_id, tag_id, tz).await?;
    }

    refresh_menu(conn, gateway, line_user_id).await;
    Ok(newly_assigned)
}

/// Remove a tag and re-resolve the user's menu from the remaining state.
pub async fn unassign_tag(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    line_user_id: i32,
    tag_id: i32,
) -> Result<bool> {
    let removed = diesel::delete(
        line_user_tags::table
            .filter(line_user_tags::line_user_id.eq(line_user_id))
            .filter(line_user_tags::tag_id.eq(tag_id)),
    )
    .execute(conn)
    .await?;

    refresh_menu(conn, gateway, line_user_id).await;
    Ok(removed > 0)
}

// Re-resolve against a fresh user row; a failed switch is logged and never
// fails the triggering operation.
async fn refresh_menu(conn: &mut DbConnection, gateway: &dyn MessagingGateway, line_user_id: i32) {
    let user = match line_users::table
        .find(line_user_id)
        .first::<LineUser>(conn)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            warn!("cannot re-resolve menu, user {} unavailable: {}", line_user_id, e);
            return;
        }
    };
    if let Err(e) = menus::resolve_and_apply(conn, gateway, &user).await {
        warn!("menu re-resolution for user {} failed: {}", line_user_id, e);
    }
}

/// Ordered teardown of a user and everything referencing it. The storage
/// layer carries ON DELETE CASCADE as a backstop; deleting dependents
/// explicitly first keeps the procedure valid on databases restored
/// without the constraints.
pub async fn delete_user(conn: &mut DbConnection, line_user_id: i32) -> Result<()> {
    diesel::delete(step_executions::table.filter(step_executions::line_user_id.eq(line_user_id)))
        .execute(conn)
        .await?;
    diesel::delete(line_user_tags::table.filter(line_user_tags::line_user_id.eq(line_user_id)))
        .execute(conn)
        .await?;
    diesel::delete(chat_messages::table.filter(chat_messages::line_user_id.eq(line_user_id)))
        .execute(conn)
        .await?;
    diesel::delete(line_users::table.find(line_user_id))
        .execute(conn)
        .await?;
    info!("deleted user {} and dependent rows", line_user_id);
    Ok(())
}
