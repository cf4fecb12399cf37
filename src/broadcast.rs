// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

//! Broadcast fan-out and the scheduled-send sweep.
//!
//! Delivery is best-effort per batch: one failed multicast marks only its
//! own recipients failed, and the campaign ends `failed` only when every
//! batch failed. The scheduled sweep claims rows with a conditional status
//! flip so concurrent sweep runs cannot pick up the same campaign twice.

use anyhow::{anyhow, Result};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{Database, DbConnection};
use crate::line::messages::build_wire_messages;
use crate::line::{LineClient, MessagingGateway};
use crate::metrics;
use crate::models::message::{STATUS_DRAFT, STATUS_FAILED, STATUS_SCHEDULED, STATUS_SENDING, STATUS_SENT};
use crate::models::{Channel, Message};
use crate::schema::{channels, line_user_tags, line_users, messages};

/// Per-batch delivery accounting. A failed batch counts all of its
/// recipients as failed; there is no partial-batch attribution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batches: usize,
    pub success: i32,
    pub failure: i32,
}

impl BatchOutcome {
    /// Final campaign status: `failed` only when every attempted batch
    /// failed; zero batches (no recipients) counts as sent.
    pub fn final_status(&self) -> &'static str {
        if self.batches > 0 && self.success == 0 {
            STATUS_FAILED
        } else {
            STATUS_SENT
        }
    }
}

/// Fan one wire payload out to all recipients in cap-sized batches.
pub async fn deliver_batches(
    gateway: &dyn MessagingGateway,
    recipients: &[String],
    wire_messages: &[Value],
    cap: usize,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for chunk in recipients.chunks(cap.max(1)) {
        outcome.batches += 1;
        match gateway.multicast(chunk, wire_messages).await {
            Ok(()) => {
                outcome.success += chunk.len() as i32;
                metrics::BROADCAST_BATCHES.with_label_values(&["success"]).inc();
            }
            Err(e) => {
                warn!("multicast batch of {} recipients failed: {}", chunk.len(), e);
                outcome.failure += chunk.len() as i32;
                metrics::BROADCAST_BATCHES.with_label_values(&["failure"]).inc();
            }
        }
    }
    outcome
}

/// Resolve the recipient set: all non-blocked users of the channel,
/// intersected with holders of any filter tag when the filter is set.
pub async fn resolve_recipients(
    conn: &mut DbConnection,
    channel_id: i32,
    tag_ids: &[i32],
) -> Result<Vec<String>> {
    let mut query = line_users::table
        .filter(line_users::channel_id.eq(channel_id))
        .filter(line_users::is_blocked.eq(false))
        .into_boxed();

    if !tag_ids.is_empty() {
        query = query.filter(
            line_users::id.eq_any(
                line_user_tags::table
                    .filter(line_user_tags::tag_id.eq_any(tag_ids.to_vec()))
                    .select(line_user_tags::line_user_id),
            ),
        );
    }

    Ok(query
        .select(line_users::line_user_id)
        .load::<String>(conn)
        .await?)
}

/// Operator send-now: claim the campaign out of `draft`/`scheduled` and
/// deliver it.
pub async fn send_now(db: &Database, message_id: i32) -> Result<BatchOutcome> {
    let mut conn = db.get_connection().await?;
    let claimed = diesel::update(
        messages::table
            .find(message_id)
            .filter(messages::status.eq_any(vec![STATUS_DRAFT, STATUS_SCHEDULED])),
    )
    .set(messages::status.eq(STATUS_SENDING))
    .execute(&mut conn)
    .await?;
    if claimed == 0 {
        return Err(anyhow!("message {} is not in a sendable state", message_id));
    }

    let message = messages::table
        .find(message_id)
        .first::<Message>(&mut conn)
        .await?;
    process_message(db, &message).await
}

/// Deliver one claimed campaign and record the accounting.
pub async fn process_message(db: &Database, message: &Message) -> Result<BatchOutcome> {
    let config = Config::get();
    let mut conn = db.get_connection().await?;

    let channel = channels::table
        .find(message.channel_id)
        .first::<Channel>(&mut conn)
        .await?;

    let recipients = resolve_recipients(&mut conn, message.channel_id, &message.tag_ids).await?;
    if recipients.is_empty() {
        // Nothing to deliver; terminal without any gateway call
        diesel::update(messages::table.find(message.id))
            .set((
                messages::status.eq(STATUS_SENT),
                messages::recipient_count.eq(0),
                messages::success_count.eq(0),
                messages::failure_count.eq(0),
                messages::sent_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        info!("message {} resolved zero recipients, marked sent", message.id);
        return Ok(BatchOutcome::default());
    }

    let blocks = message.content_blocks()?;
    let wire = build_wire_messages(&blocks, Some(message.id), &message.title);

    let outcome = match LineClient::for_channel(&channel) {
        Ok(gateway) => {
            deliver_batches(&gateway, &recipients, &wire, config.line.multicast_cap).await
        }
        Err(e) => {
            warn!("channel {} has unusable credentials: {}", channel.id, e);
            BatchOutcome {
                batches: recipients.len().div_ceil(config.line.multicast_cap.max(1)),
                success: 0,
                failure: recipients.len() as i32,
            }
        }
    };

    let persisted = diesel::update(messages::table.find(message.id))
        .set((
            messages::status.eq(outcome.final_status()),
            messages::recipient_count.eq(recipients.len() as i32),
            messages::success_count.eq(outcome.success),
            messages::failure_count.eq(outcome.failure),
            messages::sent_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await;
    if let Err(e) = persisted {
        // The batches already went out; this must not look like a clean failure
        error!(
            "message {} was delivered ({} ok / {} failed) but accounting failed to persist: {}",
            message.id, outcome.success, outcome.failure, e
        );
        return Err(e.into());
    }

    info!(
        "message {} finished as {}: {} recipients, {} delivered, {} failed",
        message.id,
        outcome.final_status(),
        recipients.len(),
        outcome.success,
        outcome.failure
    );
    Ok(outcome)
}

/// Periodic sweep over due `scheduled` campaigns. Each row is claimed with
/// a conditional flip to `sending`; a row another in-flight sweep already
/// claimed is skipped.
pub async fn sweep_scheduled(db: &Database, page_size: i64) -> Result<usize> {
    let mut conn = db.get_connection().await?;
    let now = Utc::now();

    let due: Vec<i32> = messages::table
        .filter(messages::status.eq(STATUS_SCHEDULED))
        .filter(messages::scheduled_at.le(now))
        .order(messages::scheduled_at.asc())
        .limit(page_size)
        .select(messages::id)
        .load(&mut conn)
        .await?;

    let mut processed = 0usize;
    for message_id in due {
        // Atomic claim: only the sweep run that flips the row processes it
        let claimed = diesel::update(
            messages::table
                .find(message_id)
                .filter(messages::status.eq(STATUS_SCHEDULED)),
        )
        .set(messages::status.eq(STATUS_SENDING))
        .execute(&mut conn)
        .await?;
        if claimed == 0 {
            continue;
        }

        let message = messages::table
            .find(message_id)
            .first::<Message>(&mut conn)
            .await?;
        if let Err(e) = process_message(db, &message).await {
            error!("scheduled message {} failed to process: {}", message_id, e);
            // Park the row as failed rather than leaving it stuck in 'sending'
            diesel::update(
                messages::table
                    .find(message_id)
                    .filter(messages::status.eq(STATUS_SENDING)),
            )
            .set(messages::status.eq(STATUS_FAILED))
            .execute(&mut conn)
            .await?;
        }
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{GatewayError, LineProfile};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Gateway double that records multicast batch sizes and fails the
    /// batches whose indexes are listed.
    #[derive(Default)]
    struct RecordingGateway {
        fail_batches: Vec<usize>,
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl MessagingGateway for RecordingGateway {
        async fn get_profile(&self, _: &str) -> Result<LineProfile, GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn push(&self, _: &str, _: &[Value]) -> Result<(), GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn multicast(&self, user_ids: &[String], _: &[Value]) -> Result<(), GatewayError> {
            let mut sizes = self.batch_sizes.lock().unwrap();
            let index = sizes.len();
            sizes.push(user_ids.len());
            if self.fail_batches.contains(&index) {
                return Err(GatewayError::Api {
                    status: 500,
                    body: "injected".to_string(),
                });
            }
            Ok(())
        }
        async fn create_rich_menu(&self, _: &Value) -> Result<String, GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn upload_rich_menu_image(
            &self,
            _: &str,
            _: Vec<u8>,
            _: &str,
        ) -> Result<(), GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn delete_rich_menu(&self, _: &str) -> Result<(), GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn link_menu_to_user(&self, _: &str, _: &str) -> Result<(), GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn unlink_menu_from_user(&self, _: &str) -> Result<(), GatewayError> {
            unreachable!("not used by broadcast")
        }
        async fn set_platform_default_menu(&self, _: &str) -> Result<(), GatewayError> {
            unreachable!("not used by broadcast")
        }
    }

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("U{:04}", i)).collect()
    }

    #[tokio::test]
    async fn twelve_hundred_recipients_make_three_batches() {
        let gateway = RecordingGateway::default();
        let outcome = deliver_batches(&gateway, &recipients(1200), &[], 500).await;
        assert_eq!(*gateway.batch_sizes.lock().unwrap(), vec![500, 500, 200]);
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.success, 1200);
        assert_eq!(outcome.failure, 0);
        assert_eq!(outcome.final_status(), STATUS_SENT);
    }

    #[tokio::test]
    async fn one_failed_batch_still_ends_sent_with_split_counts() {
        let gateway = RecordingGateway {
            fail_batches: vec![1],
            ..Default::default()
        };
        let outcome = deliver_batches(&gateway, &recipients(1200), &[], 500).await;
        assert_eq!(outcome.success, 700);
        assert_eq!(outcome.failure, 500);
        assert_eq!(outcome.final_status(), STATUS_SENT);
    }

    #[tokio::test]
    async fn all_batches_failing_marks_the_campaign_failed() {
        let gateway = RecordingGateway {
            fail_batches: vec![0, 1, 2],
            ..Default::default()
        };
        let outcome = deliver_batches(&gateway, &recipients(1200), &[], 500).await;
        assert_eq!(outcome.success, 0);
        assert_eq!(outcome.failure, 1200);
        assert_eq!(outcome.final_status(), STATUS_FAILED);
    }

    #[tokio::test]
    async fn zero_recipients_make_no_gateway_calls() {
        let gateway = RecordingGateway::default();
        let outcome = deliver_batches(&gateway, &[], &[], 500).await;
        assert!(gateway.batch_sizes.lock().unwrap().is_empty());
        assert_eq!(outcome, BatchOutcome::default());
        assert_eq!(outcome.final_status(), STATUS_SENT);
    }
}
