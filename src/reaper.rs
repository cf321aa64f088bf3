use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that reclaims expired soft locks, bounding how long a
/// slot stays held by a session that never confirmed or disconnected
/// cleanly. Correctness does not depend on the tick: the lock table already
/// ignores expired locks inline.
pub async fn run_reaper(engine: Arc<Engine>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_locks(now);
        for (key, owner) in expired {
            if engine.expire_lock(key, owner).await {
                info!(
                    "reaped expired {} lock held by session {owner}",
                    key.resource.kind
                );
            }
        }
    }
}
