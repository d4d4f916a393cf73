//! Wait for the filesystem to stop changing

use super::{ImportContext, Importer};
use crate::status::{Status, StatusType};
use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poll file sizes until two consecutive polls agree.
///
/// The poll interval starts at `initial` and doubles each round. Returns
/// `false` if `timeout` ran out first. Missing files count as stable. An
/// abort ends the wait early; the caller checks the token.
pub async fn wait_for_settle(
    paths: &BTreeSet<String>,
    initial: Duration,
    timeout: Duration,
    abort: &CancellationToken,
) -> bool {
    if paths.is_empty() {
        return true;
    }

    let deadline = Instant::now() + timeout;
    let mut interval = initial.max(Duration::from_millis(1));
    let mut last = sizes(paths);

    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval.min(deadline - now)) => {}
            _ = abort.cancelled() => return true,
        }

        let current = sizes(paths);
        if current == last {
            return true;
        }
        debug!(paths = paths.len(), interval_ms = interval.as_millis() as u64, "Files still changing");
        last = current;
        interval = interval.saturating_mul(2);
    }
}

fn sizes(paths: &BTreeSet<String>) -> Vec<Option<u64>> {
    paths
        .iter()
        .map(|p| std::fs::metadata(p).ok().map(|m| m.len()))
        .collect()
}

impl Importer {
    pub(super) async fn settle(&self, ctx: &mut ImportContext) -> Result<()> {
        let paths = ctx.diff.settle_paths();
        if paths.is_empty() {
            ctx.summary.settled = true;
            return Ok(());
        }

        let mut status = Status::new(StatusType::FilesSettle, Some(paths.len()));
        self.state.status.start(&mut status).await;
        let config = &self.state.config;
        let settled =
            wait_for_settle(&paths, config.settle_poll_initial, config.settle_timeout, &ctx.abort).await;
        self.state.status.finish(&status).await;

        if !settled {
            warn!(
                library_id = ctx.library_id(),
                paths = paths.len(),
                timeout_secs = config.settle_timeout.as_secs_f64(),
                "Filesystem did not settle before timeout, importing anyway; results may be incomplete"
            );
        }
        ctx.summary.settled = settled;
        ctx.check_abort()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_stable_file_settles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cbz");
        std::fs::write(&path, b"comic").unwrap();
        let paths: BTreeSet<String> = [path.to_string_lossy().into_owned()].into();

        let settled = wait_for_settle(
            &paths,
            Duration::from_millis(5),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(settled);
    }

    #[tokio::test]
    async fn test_missing_file_counts_as_stable() {
        let paths: BTreeSet<String> = ["/nonexistent/codex/a.cbz".to_string()].into();
        let settled = wait_for_settle(
            &paths,
            Duration::from_millis(5),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(settled);
    }

    #[tokio::test]
    async fn test_zero_timeout_reports_unsettled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.cbz");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"x").unwrap();
        let paths: BTreeSet<String> = [path.to_string_lossy().into_owned()].into();

        let settled =
            wait_for_settle(&paths, Duration::from_millis(5), Duration::ZERO, &CancellationToken::new())
                .await;
        assert!(!settled);
    }

    #[tokio::test]
    async fn test_empty_set_is_settled() {
        assert!(
            wait_for_settle(
                &BTreeSet::new(),
                Duration::from_millis(5),
                Duration::ZERO,
                &CancellationToken::new()
            )
            .await
        );
    }
}
