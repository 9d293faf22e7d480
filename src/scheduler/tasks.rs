use std::time::Instant;

use anyhow::{Context, Result};
use tokio_cron_scheduler::Job;
use tracing::{debug, error, info};

use crate::dedup::sqlite::SqliteKv;
use crate::scheduler::Scheduler;

/// Delete dedup markers whose TTL has passed on every tick of `cron_expr`
/// (six fields, seconds first).
pub async fn register_purge_task(scheduler: &Scheduler, kv: SqliteKv, cron_expr: &str) -> Result<()> {
    let job = Job::new_async(cron_expr, move |_uuid, _lock| {
        let kv = kv.clone();
        Box::pin(async move {
            purge_once(&kv).await;
        })
    })
    .with_context(|| format!("Invalid purge cron expression: {}", cron_expr))?;

    scheduler.add(job).await?;
    info!("Scheduled dedup purge with cron: {}", cron_expr);
    Ok(())
}

/// One purge pass; returns how many markers were removed
async fn purge_once(kv: &SqliteKv) -> usize {
    let started = Instant::now();
    match kv.purge_expired().await {
        Ok(0) => {
            debug!("Dedup purge: nothing expired");
            0
        }
        Ok(removed) => {
            info!(
                "Purged {} expired dedup marker(s) in {} ms",
                removed,
                started.elapsed().as_millis()
            );
            removed
        }
        Err(e) => {
            error!("Dedup purge failed: {:#}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::KvStore;

    #[tokio::test]
    async fn test_register_purge_task() {
        let scheduler = Scheduler::new().await.unwrap();
        let kv = SqliteKv::open_in_memory().unwrap();
        assert!(register_purge_task(&scheduler, kv, "0 */10 * * * *").await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_bad_cron() {
        let scheduler = Scheduler::new().await.unwrap();
        let kv = SqliteKv::open_in_memory().unwrap();
        assert!(register_purge_task(&scheduler, kv, "not a cron").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_once_removes_only_expired() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("message_processed_1", "x", 0).await.unwrap();
        kv.set("message_processed_2", "y", 3600).await.unwrap();

        assert_eq!(purge_once(&kv).await, 1);
        assert_eq!(purge_once(&kv).await, 0);
        assert!(kv.get("message_processed_2").await.unwrap().is_some());
    }
}
