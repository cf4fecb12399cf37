// Copyright (c) LINE Console Contributors
// SPDX-License-Identifier: Apache-2.0

//! Step-messaging ("drip campaign") engine.
//!
//! Executions are created by triggers (follow, tag assignment, manual
//! start) and advanced by a page-bounded periodic sweep. Delivery failure
//! never blocks advancement: the schedule keeps moving so one broken
//! delivery cannot pile up a permanently stuck backlog.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel::OptionalExtension;
use diesel_async::RunQueryDsl;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{Database, DbConnection};
use crate::line::messages::build_wire_messages;
use crate::line::{LineClient, MessagingGateway};
use crate::metrics;
use crate::models::step::{
    NewStepExecution, EXECUTION_ACTIVE, EXECUTION_COMPLETED, TRIGGER_FOLLOW, TRIGGER_TAG_ASSIGNED,
};
use crate::models::{StepExecution, StepMessage, StepScenario};
use crate::schema::{channels, line_users, step_executions, step_messages, step_scenarios};

/// Outcome of one attempted execution start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Created,
    /// An active execution already exists for this (scenario, user), or the
    /// requested starting step does not exist.
    Skipped,
}

/// Created/skipped accounting reported back to operators for bulk starts.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StartReport {
    pub created: usize,
    pub skipped: usize,
}

/// Compute when a step fires.
///
/// Without a send hour the step fires at exactly `now + delay_minutes`
/// (zero delay means immediately). With a send hour, `delay_minutes` is
/// treated as a whole-day offset and the fire time snaps to
/// `send_hour:send_minute` in the scheduler timezone; a candidate already
/// in the past rolls one day forward.
pub fn compute_next_send_at(
    now: DateTime<Utc>,
    delay_minutes: i32,
    send_hour: Option<i32>,
    send_minute: Option<i32>,
    tz: Tz,
) -> DateTime<Utc> {
    let delay = delay_minutes.max(0) as i64;
    let hour = match send_hour {
        Some(hour) => hour.clamp(0, 23) as u32,
        None => return now + Duration::minutes(delay),
    };
    let minute = send_minute.unwrap_or(0).clamp(0, 59) as u32;

    let local_now = now.with_timezone(&tz);
    let days = delay / 1440;
    let mut date = local_now.date_naive() + Duration::days(days);
    let mut candidate = localize(tz, date.and_hms_opt(hour, minute, 0).unwrap_or_default());
    if candidate < local_now {
        date += Duration::days(1);
        candidate = localize(tz, date.and_hms_opt(hour, minute, 0).unwrap_or_default());
    }
    candidate.with_timezone(&Utc)
}

// Resolve a wall-clock instant, skipping forward over DST gaps.
fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive).with_timezone(&tz))
}

/// Start `scenario` for one user at `from_step`, respecting the
/// one-active-execution-per-(scenario, user) invariant.
pub async fn start_execution(
    conn: &mut DbConnection,
    scenario: &StepScenario,
    line_user_id: i32,
    from_step: i32,
    tz: Tz,
) -> Result<StartOutcome> {
    let already_active: i64 = step_executions::table
        .filter(step_executions::scenario_id.eq(scenario.id))
        .filter(step_executions::line_user_id.eq(line_user_id))
        .filter(step_executions::status.eq(EXECUTION_ACTIVE))
        .count()
        .get_result(conn)
        .await?;
    if already_active > 0 {
        return Ok(StartOutcome::Skipped);
    }

    let step = step_messages::table
        .filter(step_messages::scenario_id.eq(scenario.id))
        .filter(step_messages::step_order.eq(from_step))
        .first::<StepMessage>(conn)
        .await
        .optional()?;
    let step = match step {
        Some(step) => step,
        None => {
            warn!(
                "scenario {} has no step {}, not starting for user {}",
                scenario.id, from_step, line_user_id
            );
            return Ok(StartOutcome::Skipped);
        }
    };

    let execution = NewStepExecution {
        scenario_id: scenario.id,
        line_user_id,
        current_step: from_step,
        next_send_at: compute_next_send_at(
            Utc::now(),
            step.delay_minutes,
            step.send_hour,
            step.send_minute,
            tz,
        ),
        status: EXECUTION_ACTIVE.to_string(),
    };
    diesel::insert_into(step_executions::table)
        .values(&execution)
        .execute(conn)
        .await?;

    info!(
        "started scenario {} for user {} at step {}",
        scenario.id, line_user_id, from_step
    );
    Ok(StartOutcome::Created)
}

/// Start every active follow-trigger scenario of the channel for one user.
pub async fn trigger_follow_scenarios(
    conn: &mut DbConnection,
    channel_id: i32,
    line_user_id: i32,
    tz: Tz,
) -> Result<()> {
    let scenarios: Vec<StepScenario> = step_scenarios::table
        .filter(step_scenarios::channel_id.eq(channel_id))
        .filter(step_scenarios::trigger_type.eq(TRIGGER_FOLLOW))
        .filter(step_scenarios::is_active.eq(true))
        .load(conn)
        .await?;

    for scenario in scenarios {
        if let Err(e) = start_execution(conn, &scenario, line_user_id, 1, tz).await {
            warn!(
                "failed to start follow scenario {} for user {}: {}",
                scenario.id, line_user_id, e
            );
        }
    }
    Ok(())
}

/// Start every active scenario triggered by the given tag for one user.
pub async fn trigger_tag_scenarios(
    conn: &mut DbConnection,
    channel_id: i32,
    line_user_id: i32,
    tag_id: i32,
    tz: Tz,
) -> Result<()> {
    let scenarios: Vec<StepScenario> = step_scenarios::table
        .filter(step_scenarios::channel_id.eq(channel_id))
        .filter(step_scenarios::trigger_type.eq(TRIGGER_TAG_ASSIGNED))
        .filter(step_scenarios::trigger_tag_id.eq(tag_id))
        .filter(step_scenarios::is_active.eq(true))
        .load(conn)
        .await?;

    for scenario in scenarios {
        if let Err(e) = start_execution(conn, &scenario, line_user_id, 1, tz).await {
            warn!(
                "failed to start tag scenario {} for user {}: {}",
                scenario.id, line_user_id, e
            );
        }
    }
    Ok(())
}

/// Operator-invoked bulk start against an explicit user set, from an
/// arbitrary starting step. Duplicate-active users are counted as skipped,
/// not errors.
pub async fn manual_start(
    conn: &mut DbConnection,
    scenario: &StepScenario,
    line_user_ids: &[i32],
    from_step: i32,
    tz: Tz,
) -> Result<StartReport> {
    let mut report = StartReport::default();
    for &line_user_id in line_user_ids {
        match start_execution(conn, scenario, line_user_id, from_step, tz).await {
            Ok(StartOutcome::Created) => report.created += 1,
            Ok(StartOutcome::Skipped) => report.skipped += 1,
            Err(e) => {
                warn!(
                    "manual start of scenario {} failed for user {}: {}",
                    scenario.id, line_user_id, e
                );
                report.skipped += 1;
            }
        }
    }
    Ok(report)
}

/// Advance a page of due executions: send the current step and move the
/// pointer forward or complete. Invoked periodically by the external
/// scheduler; safe to re-run, duplicate delivery on concurrent runs is the
/// documented at-least-once residual.
pub async fn advance_due_executions(db: &Database, page_size: i64) -> Result<usize> {
    let config = Config::get();
    let tz = config.scheduler_timezone()?;
    let mut conn = db.get_connection().await?;
    let now = Utc::now();

    let due: Vec<StepExecution> = step_executions::table
        .filter(step_executions::status.eq(EXECUTION_ACTIVE))
        .filter(step_executions::next_send_at.le(now))
        .order(step_executions::next_send_at.asc())
        .limit(page_size)
        .load(&mut conn)
        .await?;

    let mut processed = 0usize;
    for execution in due {
        if let Err(e) = advance_one(&mut conn, &execution, tz).await {
            warn!("failed to advance execution {}: {}", execution.id, e);
            continue;
        }
        metrics::STEP_ADVANCES.inc();
        processed += 1;
    }
    Ok(processed)
}

async fn advance_one(conn: &mut DbConnection, execution: &StepExecution, tz: Tz) -> Result<()> {
    let step = step_messages::table
        .filter(step_messages::scenario_id.eq(execution.scenario_id))
        .filter(step_messages::step_order.eq(execution.current_step))
        .first::<StepMessage>(conn)
        .await
        .optional()?;
    let step = match step {
        Some(step) => step,
        None => {
            // The step was deleted from under the execution; terminate
            warn!(
                "execution {} points at missing step {} of scenario {}, completing",
                execution.id, execution.current_step, execution.scenario_id
            );
            return complete_execution(conn, execution.id).await;
        }
    };

    let scenario = step_scenarios::table
        .find(execution.scenario_id)
        .first::<StepScenario>(conn)
        .await
        .optional()?;
    let scenario = match scenario {
        Some(scenario) => scenario,
        None => {
            warn!("execution {} has no scenario, completing", execution.id);
            return complete_execution(conn, execution.id).await;
        }
    };

    let user: Option<(String, i32)> = line_users::table
        .find(execution.line_user_id)
        .select((line_users::line_user_id, line_users::channel_id))
        .first(conn)
        .await
        .optional()?;
    let (platform_user_id, _) = match user {
        Some(user) => user,
        None => {
            warn!("execution {} has no user, completing", execution.id);
            return complete_execution(conn, execution.id).await;
        }
    };

    let channel = channels::table
        .find(scenario.channel_id)
        .first::<crate::models::Channel>(conn)
        .await
        .optional()?;
    let channel = match channel {
        Some(channel) => channel,
        None => {
            warn!("scenario {} has no channel, completing execution {}", scenario.id, execution.id);
            return complete_execution(conn, execution.id).await;
        }
    };

    // Delivery is best-effort; the schedule advances either way
    match step.content_blocks() {
        Ok(blocks) => {
            let wire = build_wire_messages(&blocks, None, &scenario.name);
            match LineClient::for_channel(&channel) {
                Ok(gateway) => {
                    if let Err(e) = gateway.push(&platform_user_id, &wire).await {
                        warn!(
                            "step {} of scenario {} failed to deliver to user {}: {}",
                            step.step_order, scenario.id, execution.line_user_id, e
                        );
                    }
                }
                Err(e) => warn!("channel {} has unusable credentials: {}", channel.id, e),
            }
        }
        Err(e) => warn!("skipping delivery of malformed step {}: {}", step.id, e),
    }

    let next_step = step_messages::table
        .filter(step_messages::scenario_id.eq(execution.scenario_id))
        .filter(step_messages::step_order.eq(execution.current_step + 1))
        .first::<StepMessage>(conn)
        .await
        .optional()?;

    match next_step {
        Some(next) => {
            let next_send_at = compute_next_send_at(
                Utc::now(),
                next.delay_minutes,
                next.send_hour,
                next.send_minute,
                tz,
            );
            diesel::update(step_executions::table.find(execution.id))
                .set((
                    step_executions::current_step.eq(execution.current_step + 1),
                    step_executions::next_send_at.eq(next_send_at),
                ))
                .execute(conn)
                .await?;
        }
        None => complete_execution(conn, execution.id).await?,
    }
    Ok(())
}

async fn complete_execution(conn: &mut DbConnection, execution_id: i32) -> Result<()> {
    diesel::update(step_executions::table.find(execution_id))
        .set((
            step_executions::status.eq(EXECUTION_COMPLETED),
            step_executions::completed_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Tokyo;

    fn tokyo(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Tokyo
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn zero_delay_without_hour_fires_immediately() {
        let now = tokyo(2024, 6, 1, 14, 30);
        assert_eq!(compute_next_send_at(now, 0, None, None, Tokyo), now);
    }

    #[test]
    fn plain_delay_fires_at_exact_offset() {
        let now = tokyo(2024, 6, 1, 14, 30);
        assert_eq!(
            compute_next_send_at(now, 90, None, None, Tokyo),
            now + Duration::minutes(90)
        );
    }

    #[test]
    fn two_day_delay_with_hour_snaps_to_that_hour_two_days_later() {
        // 2880 minutes = 2 days; any start time of day lands on 09:00
        for &(h, mi) in &[(0, 5), (8, 59), (9, 0), (14, 30), (23, 45)] {
            let now = tokyo(2024, 6, 1, h, mi);
            assert_eq!(
                compute_next_send_at(now, 2880, Some(9), None, Tokyo),
                tokyo(2024, 6, 3, 9, 0),
                "start {}:{:02}",
                h,
                mi
            );
        }
    }

    #[test]
    fn same_day_hour_already_past_rolls_to_next_day() {
        let now = tokyo(2024, 6, 1, 14, 0);
        assert_eq!(
            compute_next_send_at(now, 0, Some(9), Some(30), Tokyo),
            tokyo(2024, 6, 2, 9, 30)
        );
    }

    #[test]
    fn same_day_hour_still_ahead_fires_today() {
        let now = tokyo(2024, 6, 1, 8, 0);
        assert_eq!(
            compute_next_send_at(now, 0, Some(9), None, Tokyo),
            tokyo(2024, 6, 1, 9, 0)
        );
    }
}
