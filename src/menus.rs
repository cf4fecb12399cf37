// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rich-menu resolution and switching.
//!
//! Two deliberately separate entry points share the precedence logic:
//! per-user resolution (`resolve_menu_for` + `apply_menu`, driven by tag
//! and follow events) links menus to individual users, while the periodic
//! window sweep (`sweep_display_windows`) moves the platform-wide default
//! as display windows open and close. The remote operations behind them
//! are different gateway calls and must stay distinct.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::OptionalExtension;
use diesel_async::RunQueryDsl;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::db::{Database, DbConnection};
use crate::line::{LineClient, MessagingGateway};
use crate::metrics;
use crate::models::rich_menu::{RichMenu, TapAction, TapArea};
use crate::models::{Channel, LineUser};
use crate::schema::{channels, line_user_tags, line_users, rich_menus, tags};

/// An open-display-window candidate: (menu id, created_at).
pub type WindowCandidate = (i32, DateTime<Utc>);

/// A tag-linked candidate: (tag priority, tag id, linked menu id).
pub type TagCandidate = (i32, i32, i32);

/// Rank menu candidates for one user. Pure precedence core shared by the
/// per-user path; highest first:
/// 1. an open display-window menu (newest creation wins),
/// 2. the highest-priority tag-linked menu (lowest tag id wins ties),
/// 3. the channel default,
/// 4. none.
pub fn pick_menu(
    open_windows: &[WindowCandidate],
    tag_linked: &[TagCandidate],
    channel_default: Option<i32>,
) -> Option<i32> {
    if let Some((menu_id, _)) = open_windows
        .iter()
        .max_by_key(|(menu_id, created_at)| (*created_at, *menu_id))
    {
        return Some(*menu_id);
    }

    if let Some((_, _, menu_id)) = tag_linked
        .iter()
        .max_by_key(|(priority, tag_id, _)| (*priority, std::cmp::Reverse(*tag_id)))
    {
        return Some(*menu_id);
    }

    channel_default
}

/// The remote operation needed to move a user from `current` to `target`.
/// `None` means the states already agree and no gateway call may be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuSwitch {
    Link(i32),
    Unlink,
}

pub fn switch_action(current: Option<i32>, target: Option<i32>) -> Option<MenuSwitch> {
    if current == target {
        return None;
    }
    match target {
        Some(menu_id) => Some(MenuSwitch::Link(menu_id)),
        None => Some(MenuSwitch::Unlink),
    }
}

/// Compute which menu should currently be bound to `user`.
///
/// Only registered menus (non-null external id) are considered at every
/// tier, since unregistered menus cannot be linked.
pub async fn resolve_menu_for(conn: &mut DbConnection, user: &LineUser) -> Result<Option<i32>> {
    let now = Utc::now();

    let open_windows: Vec<WindowCandidate> = rich_menus::table
        .filter(rich_menus::channel_id.eq(user.channel_id))
        .filter(rich_menus::line_rich_menu_id.is_not_null())
        .filter(rich_menus::display_period_start.le(now))
        .filter(rich_menus::display_period_end.ge(now))
        .select((rich_menus::id, rich_menus::created_at))
        .load(conn)
        .await?;

    let tag_rows: Vec<(i32, i32, Option<i32>)> = tags::table
        .filter(
            tags::id.eq_any(
                line_user_tags::table
                    .filter(line_user_tags::line_user_id.eq(user.id))
                    .select(line_user_tags::tag_id),
            ),
        )
        .filter(tags::rich_menu_id.is_not_null())
        .select((tags::priority, tags::id, tags::rich_menu_id))
        .load(conn)
        .await?;

    let linked_menu_ids: Vec<i32> = tag_rows.iter().filter_map(|(_, _, m)| *m).collect();
    let registered: HashSet<i32> = rich_menus::table
        .filter(rich_menus::id.eq_any(&linked_menu_ids))
        .filter(rich_menus::line_rich_menu_id.is_not_null())
        .select(rich_menus::id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .collect();

    let tag_linked: Vec<TagCandidate> = tag_rows
        .into_iter()
        .filter_map(|(priority, tag_id, menu_id)| {
            menu_id
                .filter(|m| registered.contains(m))
                .map(|m| (priority, tag_id, m))
        })
        .collect();

    let channel_default: Option<i32> = match channels::table
        .find(user.channel_id)
        .select(channels::default_rich_menu_id)
        .first::<Option<i32>>(conn)
        .await?
    {
        Some(default_id) => rich_menus::table
            .find(default_id)
            .filter(rich_menus::line_rich_menu_id.is_not_null())
            .select(rich_menus::id)
            .first::<i32>(conn)
            .await
            .optional()?,
        None => None,
    };

    Ok(pick_menu(&open_windows, &tag_linked, channel_default))
}

/// Reconcile the user's remote menu link to `target`.
///
/// A no-op when the recorded link already matches. Otherwise the gateway
/// call runs first and the local `current_rich_menu_id` is persisted only
/// after it succeeds, so local state never claims a switch that did not
/// happen. Callers isolate errors: a failed switch must not fail the tag
/// assignment or follow that triggered it.
pub async fn apply_menu(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    user: &LineUser,
    target: Option<i32>,
) -> Result<()> {
    let action = match switch_action(user.current_rich_menu_id, target) {
        Some(action) => action,
        None => {
            debug!("menu for user {} already {:?}, skipping", user.id, target);
            return Ok(());
        }
    };

    match action {
        MenuSwitch::Link(menu_id) => {
            let external_id: Option<Option<String>> = rich_menus::table
                .find(menu_id)
                .select(rich_menus::line_rich_menu_id)
                .first(conn)
                .await
                .optional()?;
            let external_id = match external_id.flatten() {
                Some(id) => id,
                None => {
                    warn!("menu {} is gone or unregistered, cannot link user {}", menu_id, user.id);
                    return Ok(());
                }
            };
            gateway
                .link_menu_to_user(&user.line_user_id, &external_id)
                .await?;
        }
        MenuSwitch::Unlink => {
            gateway.unlink_menu_from_user(&user.line_user_id).await?;
        }
    }
    metrics::MENU_SWITCHES.inc();

    let persisted = diesel::update(line_users::table.find(user.id))
        .set(line_users::current_rich_menu_id.eq(target))
        .execute(conn)
        .await;
    if let Err(e) = persisted {
        // The remote link already moved; surface this divergence loudly
        error!(
            "menu switch for user {} applied remotely but the local record failed to update: {}",
            user.id, e
        );
        return Err(e.into());
    }

    info!("switched menu for user {} to {:?}", user.id, target);
    Ok(())
}

/// Recompute and reconcile one user's menu. Convenience wrapper used after
/// tag assigns/unassigns and follows.
pub async fn resolve_and_apply(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    user: &LineUser,
) -> Result<()> {
    let target = resolve_menu_for(conn, user).await?;
    apply_menu(conn, gateway, user, target).await
}

/// Periodic display-window sweep.
///
/// Activates registered menus whose window just opened by promoting them to
/// the platform-wide default, and deactivates menus whose window closed,
/// reverting the platform default to the channel's designated default menu.
/// This moves the channel-wide default served to unlinked users; it never
/// touches per-user links.
pub async fn sweep_display_windows(db: &Database, page_size: i64) -> Result<usize> {
    let mut conn = db.get_connection().await?;
    let now = Utc::now();
    let mut processed = 0usize;

    // Windows that just opened
    let opening: Vec<(i32, i32, Option<String>)> = rich_menus::table
        .filter(rich_menus::is_active.eq(false))
        .filter(rich_menus::line_rich_menu_id.is_not_null())
        .filter(rich_menus::display_period_start.le(now))
        .filter(rich_menus::display_period_end.ge(now))
        .select((rich_menus::id, rich_menus::channel_id, rich_menus::line_rich_menu_id))
        .limit(page_size)
        .load(&mut conn)
        .await?;

    for (menu_id, channel_id, external_id) in opening {
        let external_id = match external_id {
            Some(id) => id,
            None => continue,
        };
        let channel = match load_channel(&mut conn, channel_id).await? {
            Some(channel) => channel,
            None => continue,
        };
        let gateway = match LineClient::for_channel(&channel) {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!("channel {} has unusable credentials: {}", channel_id, e);
                continue;
            }
        };
        if let Err(e) = gateway.set_platform_default_menu(&external_id).await {
            warn!("failed to activate window menu {}: {}", menu_id, e);
            continue;
        }
        diesel::update(rich_menus::table.find(menu_id))
            .set(rich_menus::is_active.eq(true))
            .execute(&mut conn)
            .await?;
        info!("activated display-window menu {} for channel {}", menu_id, channel_id);
        processed += 1;
    }

    // Windows that just closed
    let closing: Vec<(i32, i32)> = rich_menus::table
        .filter(rich_menus::is_active.eq(true))
        .filter(rich_menus::display_period_end.lt(now))
        .select((rich_menus::id, rich_menus::channel_id))
        .limit(page_size)
        .load(&mut conn)
        .await?;

    for (menu_id, channel_id) in closing {
        let channel = match load_channel(&mut conn, channel_id).await? {
            Some(channel) => channel,
            None => continue,
        };

        // Revert the platform default to the channel's designated menu
        let default_external: Option<String> = match channel.default_rich_menu_id {
            Some(default_id) => rich_menus::table
                .find(default_id)
                .select(rich_menus::line_rich_menu_id)
                .first::<Option<String>>(&mut conn)
                .await
                .optional()?
                .flatten(),
            None => None,
        };

        match default_external {
            Some(external_id) => {
                let gateway = match LineClient::for_channel(&channel) {
                    Ok(gateway) => gateway,
                    Err(e) => {
                        warn!("channel {} has unusable credentials: {}", channel_id, e);
                        continue;
                    }
                };
                if let Err(e) = gateway.set_platform_default_menu(&external_id).await {
                    warn!(
                        "failed to revert default menu for channel {} after window close: {}",
                        channel_id, e
                    );
                    continue;
                }
            }
            None => {
                info!(
                    "channel {} has no registered default menu to revert to after menu {} closed",
                    channel_id, menu_id
                );
            }
        }

        diesel::update(rich_menus::table.find(menu_id))
            .set(rich_menus::is_active.eq(false))
            .execute(&mut conn)
            .await?;
        info!("deactivated display-window menu {} for channel {}", menu_id, channel_id);
        processed += 1;
    }

    Ok(processed)
}

/// Build the gateway menu definition from a stored menu and its tap areas.
pub fn build_menu_definition(menu: &RichMenu, areas: &[TapArea]) -> Value {
    let wire_areas: Vec<Value> = areas
        .iter()
        .map(|area| {
            let action = match &area.action {
                TapAction::SendText { text } => json!({ "type": "message", "text": text }),
                TapAction::OpenUrl { url } => json!({ "type": "uri", "uri": url }),
            };
            json!({
                "bounds": {
                    "x": area.bounds.x,
                    "y": area.bounds.y,
                    "width": area.bounds.width,
                    "height": area.bounds.height,
                },
                "action": action,
            })
        })
        .collect();

    json!({
        "size": { "width": 2500, "height": 1686 },
        "selected": false,
        "name": menu.name,
        "chatBarText": menu.chat_bar_text,
        "areas": wire_areas,
    })
}

static IMAGE_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

/// Register a stored menu with the gateway: create the remote menu, upload
/// its image, and persist the external id only after both succeed. Until
/// then the menu cannot be linked to anyone.
pub async fn register_rich_menu(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    menu: &RichMenu,
) -> Result<String> {
    if menu.line_rich_menu_id.is_some() {
        return Err(anyhow!("menu {} is already registered", menu.id));
    }
    let image_url = menu
        .image_url
        .as_ref()
        .ok_or_else(|| anyhow!("menu {} has no image to upload", menu.id))?;

    let areas = menu.tap_areas()?;
    let definition = build_menu_definition(menu, &areas);
    let external_id = gateway.create_rich_menu(&definition).await?;

    let image = IMAGE_CLIENT
        .get(image_url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .with_context(|| format!("failed to fetch menu image {}", image_url))?;
    let content_type = image
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/png")
        .to_string();
    let bytes = image.bytes().await?.to_vec();

    if let Err(e) = gateway
        .upload_rich_menu_image(&external_id, bytes, &content_type)
        .await
    {
        // Clean up the half-registered remote menu; best effort
        if let Err(cleanup) = gateway.delete_rich_menu(&external_id).await {
            warn!("failed to clean up half-registered menu {}: {}", external_id, cleanup);
        }
        return Err(e.into());
    }

    diesel::update(rich_menus::table.find(menu.id))
        .set(rich_menus::line_rich_menu_id.eq(&external_id))
        .execute(conn)
        .await?;
    info!("registered menu {} as {}", menu.id, external_id);
    Ok(external_id)
}

/// Remove a menu from the gateway and clear every local reference to it
/// (channel default, tag links, user links). The remote delete runs first;
/// if it fails nothing is cleared locally.
pub async fn unregister_rich_menu(
    conn: &mut DbConnection,
    gateway: &dyn MessagingGateway,
    menu: &RichMenu,
) -> Result<()> {
    if let Some(external_id) = &menu.line_rich_menu_id {
        gateway.delete_rich_menu(external_id).await?;
    }

    diesel::update(channels::table.filter(channels::default_rich_menu_id.eq(menu.id)))
        .set(channels::default_rich_menu_id.eq(None::<i32>))
        .execute(conn)
        .await?;
    diesel::update(tags::table.filter(tags::rich_menu_id.eq(menu.id)))
        .set(tags::rich_menu_id.eq(None::<i32>))
        .execute(conn)
        .await?;
    diesel::update(line_users::table.filter(line_users::current_rich_menu_id.eq(menu.id)))
        .set(line_users::current_rich_menu_id.eq(None::<i32>))
        .execute(conn)
        .await?;
    diesel::update(rich_menus::table.find(menu.id))
        .set((
            rich_menus::line_rich_menu_id.eq(None::<String>),
            rich_menus::is_active.eq(false),
        ))
        .execute(conn)
        .await?;
    info!("unregistered menu {} and cleared references", menu.id);
    Ok(())
}

async fn load_channel(conn: &mut DbConnection, channel_id: i32) -> Result<Option<Channel>> {
    let channel = channels::table
        .find(channel_id)
        .first::<Channel>(conn)
        .await
        .optional()?;
    if channel.is_none() {
        warn!("channel {} referenced by a rich menu no longer exists", channel_id);
    }
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn default_wins_when_no_windows_or_tags() {
        assert_eq!(pick_menu(&[], &[], Some(7)), Some(7));
    }

    #[test]
    fn no_candidates_means_no_menu() {
        assert_eq!(pick_menu(&[], &[], None), None);
    }

    #[test]
    fn highest_priority_tag_wins_regardless_of_order() {
        // T1: priority 5 -> menu A(1), T2: priority 9 -> menu B(2)
        assert_eq!(pick_menu(&[], &[(5, 1, 1), (9, 2, 2)], Some(7)), Some(2));
        assert_eq!(pick_menu(&[], &[(9, 2, 2), (5, 1, 1)], Some(7)), Some(2));
    }

    #[test]
    fn tag_priority_ties_break_on_lowest_tag_id() {
        assert_eq!(pick_menu(&[], &[(5, 9, 1), (5, 3, 2)], None), Some(2));
        assert_eq!(pick_menu(&[], &[(5, 3, 2), (5, 9, 1)], None), Some(2));
    }

    #[test]
    fn open_window_beats_higher_priority_tag() {
        assert_eq!(
            pick_menu(&[(4, at(100))], &[(99, 1, 2)], Some(7)),
            Some(4)
        );
    }

    #[test]
    fn newest_window_menu_wins() {
        assert_eq!(
            pick_menu(&[(4, at(100)), (5, at(200)), (6, at(50))], &[], None),
            Some(5)
        );
    }

    #[test]
    fn menu_definition_maps_tap_actions_exhaustively() {
        use crate::models::rich_menu::Bounds;
        let menu = RichMenu {
            id: 1,
            channel_id: 1,
            name: "main".to_string(),
            chat_bar_text: "Menu".to_string(),
            image_url: Some("https://cdn.example.com/menu.png".to_string()),
            areas: serde_json::json!([]),
            is_default: true,
            is_active: false,
            display_period_start: None,
            display_period_end: None,
            line_rich_menu_id: None,
            created_at: at(0),
        };
        let areas = vec![
            TapArea {
                bounds: Bounds { x: 0, y: 0, width: 1250, height: 1686 },
                action: TapAction::SendText { text: "help".to_string() },
            },
            TapArea {
                bounds: Bounds { x: 1250, y: 0, width: 1250, height: 1686 },
                action: TapAction::OpenUrl { url: "https://example.com".to_string() },
            },
        ];
        let definition = build_menu_definition(&menu, &areas);
        assert_eq!(definition["size"]["width"], 2500);
        assert_eq!(definition["areas"][0]["action"]["type"], "message");
        assert_eq!(definition["areas"][0]["action"]["text"], "help");
        assert_eq!(definition["areas"][1]["action"]["type"], "uri");
        assert_eq!(definition["areas"][1]["action"]["uri"], "https://example.com");
    }

    #[test]
    fn unchanged_target_is_a_no_op() {
        assert_eq!(switch_action(Some(3), Some(3)), None);
        assert_eq!(switch_action(None, None), None);
    }

    #[test]
    fn changed_target_links_and_cleared_target_unlinks() {
        assert_eq!(switch_action(Some(3), Some(4)), Some(MenuSwitch::Link(4)));
        assert_eq!(switch_action(None, Some(4)), Some(MenuSwitch::Link(4)));
        assert_eq!(switch_action(Some(3), None), Some(MenuSwitch::Unlink));
    }
}
