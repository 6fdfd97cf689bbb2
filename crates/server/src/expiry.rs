//! The expiration sweep (§4.C, §9 Design Note): a periodic task that scans scratch sidecars
//! and reclaims anything past its `expires` instant, grounded on the teacher's periodic
//! worker shape (e.g. `crates/database/src/search_index_workers`).

use chrono::Utc;

use crate::state::SharedState;

pub async fn run(state: SharedState) {
    let interval = state.config.tus.sweep_interval();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

async fn sweep_once(state: &SharedState) {
    let descriptors = match state.scratch.list_descriptors().await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "expiration sweep failed to list scratch descriptors");
            return;
        },
    };

    let now = Utc::now();
    let mut reclaimed = 0usize;
    for descriptor in descriptors {
        if descriptor.is_expired(now) {
            if let Err(e) = state.scratch.remove(&descriptor.uid).await {
                tracing::warn!(uid = %descriptor.uid, error = %e, "failed to reclaim expired upload");
            } else {
                reclaimed += 1;
            }
        }
    }
    if reclaimed > 0 {
        tracing::info!(reclaimed, "expiration sweep reclaimed scratch uploads");
    }
}
