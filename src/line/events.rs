// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

// Event type discriminators carried in the webhook payload
pub const EVENT_FOLLOW: &str = "follow";
pub const EVENT_UNFOLLOW: &str = "unfollow";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_POSTBACK: &str = "postback";

/// Inbound webhook payload: `{destination, events: [...]}`.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

/// One platform event. Dispatch happens on `event_type`; unknown types are
/// skipped, and optional sections are tolerated missing so a malformed
/// event never poisons the rest of its batch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub postback: Option<PostbackContent>,
}

impl WebhookEvent {
    pub fn user_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.user_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostbackContent {
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_follow_and_message_events() {
        let raw = r#"{
            "destination": "U0000",
            "events": [
                {"type": "follow", "timestamp": 1712000000000,
                 "source": {"type": "user", "userId": "Uabc"}},
                {"type": "message", "timestamp": 1712000001000,
                 "source": {"type": "user", "userId": "Uabc"},
                 "message": {"id": "m1", "type": "text", "text": "hi"}}
            ]
        }"#;
        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.events.len(), 2);
        assert_eq!(payload.events[0].event_type, EVENT_FOLLOW);
        assert_eq!(payload.events[0].user_id(), Some("Uabc"));
        let message = payload.events[1].message.as_ref().unwrap();
        assert_eq!(message.text.as_deref(), Some("hi"));
    }

    #[test]
    fn tolerates_unknown_event_types_and_extra_fields() {
        let raw = r#"{
            "events": [
                {"type": "memberJoined", "joined": {"members": []}},
                {"type": "postback", "source": {"userId": "U1"},
                 "postback": {"data": "action=custom&message_id=7&block=0", "params": {}}}
            ]
        }"#;
        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.events.len(), 2);
        assert!(payload.events[0].postback.is_none());
        assert_eq!(
            payload.events[1].postback.as_ref().unwrap().data,
            "action=custom&message_id=7&block=0"
        );
    }
}
