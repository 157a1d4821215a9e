//! Fire-and-forget background jobs.
//!
//! Summarization and similar side work runs detached from the response
//! path. A job's failure is logged here and goes nowhere else: the handle
//! is dropped, so nothing ever joins it.

use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};

/// Spawn `job` on the current runtime without awaiting it.
pub fn spawn_background<F, E>(name: &'static str, job: F)
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        match job.await {
            Ok(()) => debug!(job = name, "Background job finished"),
            Err(e) => warn!(job = name, error = %e, "Background job failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn job_runs_detached() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        spawn_background("test", async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), String>(())
        });
        for _ in 0..50 {
            if ran.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_job_does_not_propagate() {
        spawn_background("failing", async { Err::<(), _>("boom") });
        tokio::task::yield_now().await;
    }
}
