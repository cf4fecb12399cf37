// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

pub static WEBHOOK_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "webhook_events_total",
        "Inbound webhook events by type and outcome",
        &["event_type", "outcome"]
    )
    .expect("metric registration")
});

pub static BROADCAST_BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "broadcast_batches_total",
        "Multicast batches by outcome",
        &["outcome"]
    )
    .expect("metric registration")
});

pub static MENU_SWITCHES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rich_menu_switches_total",
        "Per-user rich menu links/unlinks applied on the gateway"
    )
    .expect("metric registration")
});

pub static STEP_ADVANCES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "step_executions_advanced_total",
        "Step executions advanced or completed by the sweep"
    )
    .expect("metric registration")
});

/// Render the default registry in text exposition format.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
