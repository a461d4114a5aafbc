use std::{env, time::Duration};

use tokio::time;
use tracing::info;

use crate::store::{SharedStore, now_millis};

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Periodic reclaim of stale lobbies. This is the only cleanup path for
/// lobbies kept alive empty during play for reconnect tolerance.
pub async fn start_sweeper(store: SharedStore) {
    let interval_secs = env_u64("SWEEP_INTERVAL_SECONDS", 300);
    let max_age_secs = env_u64("MAX_LOBBY_AGE_SECONDS", 2 * 60 * 60);
    let max_finished_secs = env_u64("MAX_FINISHED_AGE_SECONDS", 10 * 60);

    let mut interval = time::interval(Duration::from_secs(interval_secs));

    info!(
        "sweeper running every {}s (max lobby age {}s, max finished age {}s)",
        interval_secs, max_age_secs, max_finished_secs
    );

    loop {
        interval.tick().await;
        let removed = store.sweep(now_millis(), max_age_secs * 1000, max_finished_secs * 1000);
        if removed > 0 {
            info!(
                "swept {} stale lobbies, {} remaining",
                removed,
                store.lobby_count()
            );
        }
    }
}
