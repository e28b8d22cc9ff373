use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the WAL as a snapshot once `threshold` appends have piled up.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "WAL compacted");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically checks whether the WAL needs compacting.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("headcount_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), EngineSettings::default()).unwrap();

        let date = parse_date("2025-06-20").unwrap();
        engine
            .create_quota(NewQuota {
                date,
                quota: 4,
                notes: None,
                created_by: None,
            })
            .await
            .unwrap();
        engine
            .update_quota(
                QuotaKey::Date(date),
                QuotaPatch {
                    quota: Some(6),
                    notes: None,
                },
            )
            .await
            .unwrap();

        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 2).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        drop(engine);

        let restored = Engine::new(path, EngineSettings::default()).unwrap();
        assert_eq!(restored.get_quota(QuotaKey::Date(date)).await.unwrap().quota, 6);
    }
}
