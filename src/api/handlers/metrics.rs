// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::response::IntoResponse;

use crate::metrics;

/// Prometheus text exposition of the default registry
pub async fn get_metrics() -> impl IntoResponse {
    metrics::gather()
}
