// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::rich_menus;

/// A channel-scoped rich menu definition. `line_rich_menu_id` stays null
/// until the menu has been registered with the gateway; only registered
/// menus can be linked to users or set as the platform default.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = rich_menus)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RichMenu {
    pub id: i32,
    pub channel_id: i32,
    pub name: String,
    pub chat_bar_text: String,
    pub image_url: Option<String>,
    pub areas: serde_json::Value,
    pub is_default: bool,
    pub is_active: bool,
    pub display_period_start: Option<DateTime<Utc>>,
    pub display_period_end: Option<DateTime<Utc>>,
    pub line_rich_menu_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One tappable rectangle of the menu image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapArea {
    pub bounds: Bounds,
    pub action: TapAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TapAction {
    SendText { text: String },
    OpenUrl { url: String },
}

impl RichMenu {
    /// Deserialize the stored tap-area list.
    pub fn tap_areas(&self) -> Result<Vec<TapArea>> {
        serde_json::from_value(self.areas.clone())
            .with_context(|| format!("rich menu {} has malformed areas", self.id))
    }

    /// Whether `now` falls inside the menu's display window. Menus without
    /// a window never qualify for the window precedence tier.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        match (self.display_period_start, self.display_period_end) {
            (Some(start), Some(end)) => start <= now && now <= end,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn menu(start: Option<i64>, end: Option<i64>) -> RichMenu {
        let ts = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        RichMenu {
            id: 1,
            channel_id: 1,
            name: "seasonal".to_string(),
            chat_bar_text: "Menu".to_string(),
            image_url: None,
            areas: serde_json::json!([]),
            is_default: false,
            is_active: false,
            display_period_start: start.map(ts),
            display_period_end: end.map(ts),
            line_rich_menu_id: None,
            created_at: ts(0),
        }
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let m = menu(Some(100), Some(200));
        let ts = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        assert!(m.window_contains(ts(100)));
        assert!(m.window_contains(ts(150)));
        assert!(m.window_contains(ts(200)));
        assert!(!m.window_contains(ts(99)));
        assert!(!m.window_contains(ts(201)));
    }

    #[test]
    fn missing_window_never_matches() {
        let ts = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        assert!(!menu(None, None).window_contains(ts(150)));
        assert!(!menu(Some(100), None).window_contains(ts(150)));
    }

    #[test]
    fn tap_areas_parse_from_stored_json() {
        let mut m = menu(None, None);
        m.areas = serde_json::json!([
            {
                "bounds": { "x": 0, "y": 0, "width": 1250, "height": 1686 },
                "action": { "kind": "send_text", "text": "help" }
            },
            {
                "bounds": { "x": 1250, "y": 0, "width": 1250, "height": 1686 },
                "action": { "kind": "open_url", "url": "https://example.com" }
            }
        ]);
        let areas = m.tap_areas().unwrap();
        assert_eq!(areas.len(), 2);
        assert!(matches!(&areas[0].action, TapAction::SendText { text } if text == "help"));
        assert!(matches!(&areas[1].action, TapAction::OpenUrl { url } if url == "https://example.com"));
    }
}
