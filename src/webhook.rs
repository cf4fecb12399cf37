// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

//! Webhook event processor.
//!
//! Events arrive in batches; each event is processed independently and a
//! failure in one never aborts the rest. Every branch tolerates missing
//! referenced entities (user, message, scenario, tag) by logging and
//! skipping — the platform has already been told the batch was accepted.

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::OptionalExtension;
use diesel_async::RunQueryDsl;
use once_cell::sync::Lazy;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::contacts;
use crate::db::Database;
use crate::line::events::{
    WebhookEvent, WebhookPayload, EVENT_FOLLOW, EVENT_MESSAGE, EVENT_POSTBACK, EVENT_UNFOLLOW,
};
use crate::line::messages::{parse_postback_data, POSTBACK_ACTION_CUSTOM};
use crate::line::MessagingGateway;
use crate::menus;
use crate::metrics;
use crate::models::chat::{NewChatMessage, DIRECTION_INCOMING, DIRECTION_OUTGOING};
use crate::models::line_user::{NewLineUser, ProfileSync};
use crate::models::message::ContentBlock;
use crate::models::tag::NewLineUserTag;
use crate::models::{Channel, LineUser, Message, StepScenario};
use crate::schema::{chat_messages, line_user_tags, line_users, messages, rich_menus, step_scenarios};
use crate::steps;

/// Process one verified webhook batch for one channel. Returns how many
/// events were handled successfully; the caller responds 200 regardless so
/// the platform never retries a batch that was actually accepted.
pub async fn process_webhook(
    db: &Database,
    gateway: &dyn MessagingGateway,
    channel: &Channel,
    payload: WebhookPayload,
) -> usize {
    let tz = match Config::get().scheduler_timezone() {
        Ok(tz) => tz,
        Err(e) => {
            error!("scheduler timezone misconfigured: {}", e);
            return 0;
        }
    };

    let mut handled = 0usize;
    for event in &payload.events {
        let outcome = match event.event_type.as_str() {
            EVENT_FOLLOW => handle_follow(db, gateway, channel, event, tz).await,
            EVENT_UNFOLLOW => handle_unfollow(db, channel, event).await,
            EVENT_MESSAGE => handle_message(db, gateway, channel, event).await,
            EVENT_POSTBACK => handle_postback(db, gateway, channel, event, tz).await,
            other => {
                debug!("ignoring unhandled event type {}", other);
                continue;
            }
        };
        match outcome {
            Ok(()) => {
                metrics::WEBHOOK_EVENTS
                    .with_label_values(&[event.event_type.as_str(), "ok"])
                    .inc();
                handled += 1;
            }
            Err(e) => {
                metrics::WEBHOOK_EVENTS
                    .with_label_values(&[event.event_type.as_str(), "error"])
                    .inc();
                error!(
                    "failed to process {} event for channel {}: {:#}",
                    event.event_type, channel.id, e
                );
            }
        }
    }
    handled
}

async fn handle_follow(
    db: &Database,
    gateway: &dyn MessagingGateway,
    channel: &Channel,
    event: &WebhookEvent,
    tz: Tz,
) -> Result<()> {
    let platform_user_id = match event.user_id() {
        Some(id) => id,
        None => {
            warn!("follow event without a user id, skipping");
            return Ok(());
        }
    };

    let profile = match gateway.get_profile(platform_user_id).await {
        Ok(profile) => Some(profile),
        Err(e) => {
            warn!("profile fetch for {} failed on follow: {}", platform_user_id, e);
            None
        }
    };

    let mut conn = db.get_connection().await?;
    let existing = line_users::table
        .filter(line_users::channel_id.eq(channel.id))
        .filter(line_users::line_user_id.eq(platform_user_id))
        .first::<LineUser>(&mut conn)
        .await
        .optional()?;

    if let Some(user) = existing {
        // Re-follow: unblock, refresh the profile, restart the clock.
        // Absent profile fields keep their stored values.
        let sync = ProfileSync {
            display_name: profile.as_ref().map(|p| p.display_name.clone()),
            picture_url: profile.as_ref().and_then(|p| p.picture_url.clone()),
            status_message: profile.as_ref().and_then(|p| p.status_message.clone()),
            is_blocked: false,
        };
        diesel::update(line_users::table.find(user.id))
            .set((sync, line_users::followed_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        info!("user {} re-followed channel {}", user.id, channel.id);
        return Ok(());
    }

    let new_user = NewLineUser {
        channel_id: channel.id,
        line_user_id: platform_user_id.to_string(),
        display_name: profile.as_ref().map(|p| p.display_name.clone()),
        picture_url: profile.as_ref().and_then(|p| p.picture_url.clone()),
        status_message: profile.as_ref().and_then(|p| p.status_message.clone()),
        followed_at: Utc::now(),
    };
    let mut user = diesel::insert_into(line_users::table)
        .values(&new_user)
        .get_result::<LineUser>(&mut conn)
        .await?;
    info!("user {} followed channel {}", user.id, channel.id);

    // Link the channel default first; tag resolution below may override it.
    // This is a direct link on a brand-new user, not the reconciliation
    // path — there is no prior state to no-op against.
    if let Some(default_id) = channel.default_rich_menu_id {
        let external_id: Option<String> = rich_menus::table
            .find(default_id)
            .select(rich_menus::line_rich_menu_id)
            .first::<Option<String>>(&mut conn)
            .await
            .optional()?
            .flatten();
        match external_id {
            Some(external_id) => {
                match gateway.link_menu_to_user(platform_user_id, &external_id).await {
                    Ok(()) => {
                        diesel::update(line_users::table.find(user.id))
                            .set(line_users::current_rich_menu_id.eq(default_id))
                            .execute(&mut conn)
                            .await?;
                        user.current_rich_menu_id = Some(default_id);
                    }
                    Err(e) => {
                        warn!("default menu link failed for new user {}: {}", user.id, e)
                    }
                }
            }
            None => debug!(
                "channel {} default menu {} is unregistered, nothing to link",
                channel.id, default_id
            ),
        }
    }

    // Auto-apply tags configured on the channel, then let resolution decide
    // whether one of them outranks the default that was just linked
    for &tag_id in &channel.follow_tag_ids {
        let inserted = diesel::insert_into(line_user_tags::table)
            .values(&NewLineUserTag {
                line_user_id: user.id,
                tag_id,
            })
            .on_conflict((line_user_tags::line_user_id, line_user_tags::tag_id))
            .do_nothing()
            .execute(&mut conn)
            .await;
        if let Err(e) = inserted {
            warn!("auto-apply of tag {} failed for user {}: {}", tag_id, user.id, e);
        }
    }
    if !channel.follow_tag_ids.is_empty() {
        if let Err(e) = menus::resolve_and_apply(&mut conn, gateway, &user).await {
            warn!("menu resolution after follow failed for user {}: {}", user.id, e);
        }
    }

    steps::trigger_follow_scenarios(&mut conn, channel.id, user.id, tz).await?;
    Ok(())
}

async fn handle_unfollow(db: &Database, channel: &Channel, event: &WebhookEvent) -> Result<()> {
    let platform_user_id = match event.user_id() {
        Some(id) => id,
        None => return Ok(()),
    };
    let mut conn = db.get_connection().await?;

    // History is retained for a potential re-follow; only the flag flips
    let updated = diesel::update(
        line_users::table
            .filter(line_users::channel_id.eq(channel.id))
            .filter(line_users::line_user_id.eq(platform_user_id)),
    )
    .set(line_users::is_blocked.eq(true))
    .execute(&mut conn)
    .await?;

    if updated == 0 {
        debug!("unfollow from unknown user {}, nothing to do", platform_user_id);
    } else {
        info!("user {} blocked channel {}", platform_user_id, channel.id);
    }
    Ok(())
}

async fn handle_message(
    db: &Database,
    gateway: &dyn MessagingGateway,
    channel: &Channel,
    event: &WebhookEvent,
) -> Result<()> {
    let platform_user_id = match event.user_id() {
        Some(id) => id,
        None => return Ok(()),
    };
    let message = match &event.message {
        Some(message) => message,
        None => {
            warn!("message event without a message section, skipping");
            return Ok(());
        }
    };

    let mut conn = db.get_connection().await?;
    let user = contacts::ensure_user(&mut conn, gateway, channel, platform_user_id).await?;

    let text = message.text.clone().unwrap_or_default();
    diesel::insert_into(chat_messages::table)
        .values(&NewChatMessage {
            line_user_id: user.id,
            direction: DIRECTION_INCOMING.to_string(),
            message_type: message.message_type.clone(),
            content: text.clone(),
        })
        .execute(&mut conn)
        .await?;

    diesel::update(line_users::table.find(user.id))
        .set((
            line_users::last_message_at.eq(Utc::now()),
            line_users::last_message_text.eq(Some(text)),
            line_users::unread_count.eq(line_users::unread_count + 1),
        ))
        .execute(&mut conn)
        .await?;
    Ok(())
}

async fn handle_postback(
    db: &Database,
    gateway: &dyn MessagingGateway,
    channel: &Channel,
    event: &WebhookEvent,
    tz: Tz,
) -> Result<()> {
    let platform_user_id = match event.user_id() {
        Some(id) => id,
        None => return Ok(()),
    };
    let postback = match &event.postback {
        Some(postback) => postback,
        None => {
            warn!("postback event without postback data, skipping");
            return Ok(());
        }
    };

    let pairs = parse_postback_data(&postback.data);
    if pairs.get("action").map(String::as_str) != Some(POSTBACK_ACTION_CUSTOM) {
        debug!("postback with unrecognized action, ignoring: {}", postback.data);
        return Ok(());
    }
    let message_id: i32 = match pairs.get("message_id").and_then(|v| v.parse().ok()) {
        Some(id) => id,
        None => {
            warn!("postback without a usable message_id: {}", postback.data);
            return Ok(());
        }
    };
    let block_index: usize = pairs
        .get("block")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut conn = db.get_connection().await?;
    let user = line_users::table
        .filter(line_users::channel_id.eq(channel.id))
        .filter(line_users::line_user_id.eq(platform_user_id))
        .first::<LineUser>(&mut conn)
        .await
        .optional()?;
    let user = match user {
        Some(user) => user,
        None => {
            warn!("postback from unknown user {}, skipping", platform_user_id);
            return Ok(());
        }
    };

    let message = messages::table
        .find(message_id)
        .filter(messages::channel_id.eq(channel.id))
        .first::<Message>(&mut conn)
        .await
        .optional()?;
    let message = match message {
        Some(message) => message,
        None => {
            // The referenced broadcast is gone; deliberate silent skip
            warn!("postback references missing message {}, skipping", message_id);
            return Ok(());
        }
    };

    let blocks = message.content_blocks()?;
    let action = match blocks.get(block_index) {
        Some(ContentBlock::Image {
            custom_action: Some(action),
            ..
        }) => action.clone(),
        Some(ContentBlock::Image { custom_action: None, .. })
        | Some(ContentBlock::Text { .. })
        | Some(ContentBlock::Video { .. })
        | None => {
            warn!(
                "postback block {} of message {} carries no custom action, skipping",
                block_index, message_id
            );
            return Ok(());
        }
    };

    // 1. Tags (idempotent; each fresh assign triggers scenarios and menu
    //    re-resolution through the shared path)
    for &tag_id in &action.tag_ids {
        if let Err(e) = contacts::assign_tag(&mut conn, gateway, channel, user.id, tag_id, tz).await
        {
            warn!("postback tag {} failed for user {}: {}", tag_id, user.id, e);
        }
    }

    // 2. Scenario start, duplicate-active guarded
    if let Some(scenario_id) = action.scenario_id {
        let scenario = step_scenarios::table
            .find(scenario_id)
            .filter(step_scenarios::channel_id.eq(channel.id))
            .filter(step_scenarios::is_active.eq(true))
            .first::<StepScenario>(&mut conn)
            .await
            .optional()?;
        match scenario {
            Some(scenario) => {
                match steps::start_execution(&mut conn, &scenario, user.id, 1, tz).await {
                    Ok(outcome) => debug!(
                        "postback scenario {} for user {}: {:?}",
                        scenario_id, user.id, outcome
                    ),
                    Err(e) => warn!(
                        "postback scenario {} failed for user {}: {}",
                        scenario_id, user.id, e
                    ),
                }
            }
            None => warn!(
                "postback references missing or inactive scenario {}, skipping",
                scenario_id
            ),
        }
    }

    // 3. Reply, pushed directly (no reply-token flow)
    let mut reply_lines: Vec<String> = Vec::new();
    if let Some(reply_text) = &action.reply_text {
        let name = user.display_name.clone().unwrap_or_default();
        reply_lines.push(reply_text.replace("{name}", &name));
    }
    if let Some(redirect_url) = &action.redirect_url {
        reply_lines.push(redirect_url.clone());
    }
    if !reply_lines.is_empty() {
        let wire: Vec<serde_json::Value> = reply_lines
            .iter()
            .map(|line| json!({ "type": "text", "text": line }))
            .collect();
        match gateway.push(&user.line_user_id, &wire).await {
            Ok(()) => {
                diesel::insert_into(chat_messages::table)
                    .values(&NewChatMessage {
                        line_user_id: user.id,
                        direction: DIRECTION_OUTGOING.to_string(),
                        message_type: "text".to_string(),
                        content: reply_lines.join("\n"),
                    })
                    .execute(&mut conn)
                    .await?;
            }
            Err(e) => warn!("postback reply to user {} failed: {}", user.id, e),
        }
    }

    Ok(())
}

static RELAY_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

/// Fire-and-forget relay of the raw inbound body to the channel's
/// configured forwarding URL. Runs after primary processing; failures are
/// logged and never affect the webhook response.
pub fn relay_webhook(forward_url: String, raw_body: Vec<u8>, signature: String) {
    tokio::spawn(async move {
        let result = RELAY_CLIENT
            .post(&forward_url)
            .header("Content-Type", "application/json")
            .header("X-Line-Signature", signature)
            .body(raw_body)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!("webhook relay to {} returned {}", forward_url, response.status());
            }
            Ok(_) => debug!("webhook relayed to {}", forward_url),
            Err(e) => warn!("webhook relay to {} failed: {}", forward_url, e),
        }
    });
}
