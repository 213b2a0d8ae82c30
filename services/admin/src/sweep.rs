//! Periodic removal of expired links and session entries
//!
//! Expiry is enforced on every read regardless; the sweep only keeps the
//! stores from growing.

use common::error::DatabaseResult;
use std::time::Duration;
use tracing::{error, info};

use crate::AppState;
use crate::clock::Clock;

/// Delete expired links and purge expired in-memory sessions once
pub async fn sweep_once(state: &AppState) -> DatabaseResult<u64> {
    let removed = state
        .link_repository
        .delete_expired(state.clock.now())
        .await?;
    let sessions = state.session_store.purge_expired();

    if removed > 0 || sessions > 0 {
        info!(links = removed, sessions, "Expiry sweep removed stale entries");
    }
    Ok(removed)
}

/// Run [`sweep_once`] forever at a fixed interval
pub async fn run_expiry_sweep(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = sweep_once(&state).await {
            error!("Expiry sweep failed: {}", e);
        }
    }
}
