//! Background task finishing games that ran past the time limit.

use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    dao::{entity_store::SessionQuery, models::Session},
    error::ServiceError,
    services::lifecycle_service::finish_game,
    state::SharedState,
};

/// Playing sessions whose start lies at least `limit` before `now`.
pub fn overdue_sessions(sessions: &[Session], now: SystemTime, limit: Duration) -> Vec<&Session> {
    sessions
        .iter()
        .filter(|session| {
            session
                .started_at
                .and_then(|started| now.duration_since(started).ok())
                .is_some_and(|elapsed| elapsed >= limit)
        })
        .collect()
}

/// Finish every overdue game once, returning how many were finished.
pub async fn sweep(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let playing = store
        .query_sessions(SessionQuery::playing_anywhere())
        .await?;
    let overdue = overdue_sessions(&playing, SystemTime::now(), state.rules().game_time_limit);

    let mut finished = 0;
    for session in overdue {
        match finish_game(state, session.id, &session.player_ids()).await {
            Ok(()) => {
                info!(
                    session_id = %session.id,
                    branch_id = %session.branch_id,
                    "finished overdue game"
                );
                finished += 1;
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "failed to finish overdue game")
            }
        }
    }
    Ok(finished)
}

/// Sweep on every tick of the configured interval; skipped while the store is unavailable.
pub async fn run(state: SharedState) {
    let mut ticker = interval(state.rules().watchdog_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if state.is_degraded().await {
            continue;
        }
        match sweep(&state).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "watchdog sweep finished games"),
            Err(err) => warn!(error = %err, "watchdog sweep failed"),
        }
    }
}
