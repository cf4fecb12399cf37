// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::models::message::ContentBlock;

pub const POSTBACK_ACTION_CUSTOM: &str = "custom";

/// Build the gateway wire representation of a stored content-block list.
///
/// Storage format and wire format are deliberately decoupled here: plain
/// blocks pass through as text/image/video messages, while image blocks
/// carrying a legacy `link_url` or a custom-action bundle become a buttons
/// template so the tap is actionable. `message_id` identifies the owning
/// broadcast for postback round-trips; step messages pass `None` and their
/// interactive images degrade to URI taps or plain images.
pub fn build_wire_messages(
    blocks: &[ContentBlock],
    message_id: Option<i32>,
    alt_text: &str,
) -> Vec<Value> {
    let mut wire = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                wire.push(json!({ "type": "text", "text": text }));
            }
            ContentBlock::Image {
                original_content_url,
                preview_image_url,
                link_url,
                custom_action,
            } => {
                let preview = preview_image_url.as_deref().unwrap_or(original_content_url);
                let action = match (custom_action, message_id, link_url) {
                    (Some(_), Some(id), _) => Some(json!({
                        "type": "postback",
                        "label": "Open",
                        "data": encode_postback_data(id, index),
                    })),
                    (_, _, Some(url)) => Some(json!({
                        "type": "uri",
                        "label": "Open",
                        "uri": url,
                    })),
                    _ => None,
                };
                match action {
                    Some(action) => wire.push(json!({
                        "type": "template",
                        "altText": alt_text,
                        "template": {
                            "type": "buttons",
                            "thumbnailImageUrl": original_content_url,
                            "imageSize": "cover",
                            "text": alt_text,
                            "actions": [action],
                        },
                    })),
                    None => wire.push(json!({
                        "type": "image",
                        "originalContentUrl": original_content_url,
                        "previewImageUrl": preview,
                    })),
                }
            }
            ContentBlock::Video {
                original_content_url,
                preview_image_url,
            } => {
                let preview = preview_image_url.as_deref().unwrap_or(original_content_url);
                wire.push(json!({
                    "type": "video",
                    "originalContentUrl": original_content_url,
                    "previewImageUrl": preview,
                }));
            }
        }
    }
    wire
}

/// Encode the postback payload bound to an interactive image block.
pub fn encode_postback_data(message_id: i32, block_index: usize) -> String {
    format!(
        "action={}&message_id={}&block={}",
        POSTBACK_ACTION_CUSTOM, message_id, block_index
    )
}

/// Parse a URL-encoded key-value postback payload. Unknown and malformed
/// pairs are kept or dropped without error; callers pull the keys they
/// understand.
pub fn parse_postback_data(data: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    for part in data.split('&') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, value)) => {
                pairs.insert(key.to_string(), value.to_string());
            }
            None => {
                pairs.insert(part.to_string(), String::new());
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::CustomAction;

    #[test]
    fn text_blocks_pass_through() {
        let wire = build_wire_messages(
            &[ContentBlock::Text {
                text: "hello".to_string(),
            }],
            Some(1),
            "campaign",
        );
        assert_eq!(wire, vec![json!({"type": "text", "text": "hello"})]);
    }

    #[test]
    fn plain_image_stays_an_image_message() {
        let wire = build_wire_messages(
            &[ContentBlock::Image {
                original_content_url: "https://cdn.example.com/a.png".to_string(),
                preview_image_url: None,
                link_url: None,
                custom_action: None,
            }],
            Some(1),
            "campaign",
        );
        assert_eq!(wire[0]["type"], "image");
        assert_eq!(wire[0]["previewImageUrl"], "https://cdn.example.com/a.png");
    }

    #[test]
    fn legacy_link_url_becomes_interactive_template() {
        let wire = build_wire_messages(
            &[ContentBlock::Image {
                original_content_url: "https://cdn.example.com/a.png".to_string(),
                preview_image_url: None,
                link_url: Some("https://example.com/campaign".to_string()),
                custom_action: None,
            }],
            None,
            "spring sale",
        );
        assert_eq!(wire[0]["type"], "template");
        let action = &wire[0]["template"]["actions"][0];
        assert_eq!(action["type"], "uri");
        assert_eq!(action["uri"], "https://example.com/campaign");
    }

    #[test]
    fn custom_action_becomes_postback_template() {
        let wire = build_wire_messages(
            &[ContentBlock::Image {
                original_content_url: "https://cdn.example.com/a.png".to_string(),
                preview_image_url: None,
                link_url: None,
                custom_action: Some(CustomAction {
                    tag_ids: vec![5],
                    scenario_id: None,
                    reply_text: None,
                    redirect_url: None,
                }),
            }],
            Some(42),
            "campaign",
        );
        let action = &wire[0]["template"]["actions"][0];
        assert_eq!(action["type"], "postback");
        assert_eq!(action["data"], "action=custom&message_id=42&block=0");
    }

    #[test]
    fn postback_data_round_trips_and_tolerates_extras() {
        let pairs = parse_postback_data("action=custom&message_id=42&block=0&utm=abc&flag");
        assert_eq!(pairs.get("action").map(String::as_str), Some("custom"));
        assert_eq!(pairs.get("message_id").map(String::as_str), Some("42"));
        assert_eq!(pairs.get("block").map(String::as_str), Some("0"));
        assert_eq!(pairs.get("utm").map(String::as_str), Some("abc"));
        assert_eq!(pairs.get("flag").map(String::as_str), Some(""));
    }
}
