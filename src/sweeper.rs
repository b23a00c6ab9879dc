//! Background garbage collection of expired artifacts.
//!
//! The [`Sweeper`] wakes up every `sweep_interval`, lists the artifact directory
//! and deletes every file whose modification time is more than `ttl` in the
//! past. Failures on individual entries are logged and skipped; nothing short
//! of a shutdown signal stops the loop.
//!
//! Deployment note: `ttl` must exceed the slowest single generate request,
//! otherwise a sweep could reclaim a file before its page has been served.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result, SweepError};

/// Names the sweeper never deletes, used to keep an empty directory in a checkout.
pub const DEFAULT_RESERVED: &[&str] = &[".gitkeep", ".keep"];

/// How long artifacts live and how often the directory is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl RetentionPolicy {
    /// Validates that both durations are non-zero and `sweep_interval ≤ ttl / 2`,
    /// which caps the worst-case lifetime of an artifact at `1.5 × ttl`.
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Result<Self> {
        if ttl.is_zero() || sweep_interval.is_zero() || sweep_interval > ttl / 2 {
            return Err(Error::InvalidRetentionPolicy {
                ttl,
                sweep_interval,
            });
        }
        Ok(Self {
            ttl,
            sweep_interval,
        })
    }

    /// Longest time a file can sit on disk before some tick removes it.
    pub fn max_lifetime(&self) -> Duration {
        self.ttl + self.sweep_interval
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of a single sweep tick.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Entries returned by the directory listing.
    pub scanned: usize,
    pub deleted: usize,
    pub retained: usize,
    /// Directories and reserved names.
    pub skipped: usize,
    /// Entries that disappeared between listing and stat/delete.
    pub vanished: usize,
    pub failures: Vec<SweepError>,
}

/// Periodically deletes artifacts older than the retention ttl.
pub struct Sweeper {
    dir: PathBuf,
    policy: RetentionPolicy,
    reserved: Vec<String>,
    clock: Arc<dyn Clock>,
    remove: fn(&Path) -> io::Result<()>,
}

impl Sweeper {
    pub fn new(dir: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
            reserved: DEFAULT_RESERVED.iter().map(|s| s.to_string()).collect(),
            clock: Arc::new(SystemClock),
            remove: |path| fs::remove_file(path),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the set of file names that are never deleted.
    pub fn with_reserved<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Runs one tick: list, stat and delete. Blocks on filesystem I/O.
    ///
    /// Each file is judged against the clock as read right after its own
    /// stat, not against a single snapshot for the whole tick.
    pub fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(source) => {
                report.fail(SweepError::List {
                    path: self.dir.clone(),
                    source,
                });
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    report.fail(SweepError::List {
                        path: self.dir.clone(),
                        source,
                    });
                    continue;
                }
            };
            report.scanned += 1;

            let path = self.dir.join(entry.file_name());
            if self.is_reserved(&entry.file_name().to_string_lossy()) {
                report.skipped += 1;
                continue;
            }

            // Follows symlinks: a link is judged by what it points at, and a
            // dangling link by its own timestamps.
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    match fs::symlink_metadata(&path) {
                        Ok(link) if link.file_type().is_symlink() => link,
                        _ => {
                            report.vanished += 1;
                            continue;
                        }
                    }
                }
                Err(source) => {
                    report.fail(SweepError::Stat { path, source });
                    continue;
                }
            };
            if metadata.is_dir() {
                report.skipped += 1;
                continue;
            }
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(source) => {
                    report.fail(SweepError::Stat { path, source });
                    continue;
                }
            };

            if !self.is_expired(modified, self.clock.now()) {
                report.retained += 1;
                continue;
            }

            match (self.remove)(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "deleted expired artifact");
                    report.deleted += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => report.vanished += 1,
                Err(source) => report.fail(SweepError::Delete { path, source }),
            }
        }

        report
    }

    /// Starts the sweep loop on the tokio runtime.
    ///
    /// The first tick runs immediately. Once `shutdown` flips to `true` (or its
    /// sender is dropped) the loop exits after the tick in progress, if any.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            dir = %self.dir.display(),
            ttl_secs = self.policy.ttl.as_secs(),
            interval_secs = self.policy.sweep_interval.as_secs(),
            "artifact sweeper started"
        );

        'ticks: loop {
            if *shutdown.borrow() {
                break;
            }

            let sweeper = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
                Ok(report) => {
                    if report.deleted > 0 || !report.failures.is_empty() {
                        tracing::info!(
                            scanned = report.scanned,
                            deleted = report.deleted,
                            retained = report.retained,
                            failures = report.failures.len(),
                            "sweep tick finished"
                        );
                    }
                }
                Err(err) => tracing::error!(error = %err, "sweep tick aborted"),
            }

            // Sleep out the full interval; only a `true` or a dropped sender
            // cuts it short.
            let deadline = Instant::now() + self.policy.sweep_interval;
            loop {
                let woke = tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => None,
                    changed = shutdown.changed() => Some(changed.is_ok()),
                };
                match woke {
                    None => break,
                    Some(true) if !*shutdown.borrow() => continue,
                    Some(_) => break 'ticks,
                }
            }
        }

        tracing::info!("artifact sweeper stopped");
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved.iter().any(|r| r == name)
    }

    // Strictly older than ttl. Files stamped in the future count as fresh.
    fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .map(|age| age > self.policy.ttl)
            .unwrap_or(false)
    }
}

impl SweepReport {
    fn fail(&mut self, err: SweepError) {
        tracing::warn!(path = %err.path().display(), error = %err, "sweep step failed");
        self.failures.push(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::fs::File;

    const TTL: Duration = Duration::from_secs(120);

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(TTL, Duration::from_secs(60)).unwrap()
    }

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(modified).unwrap();
        path
    }

    fn sweeper_at(dir: &Path, now: SystemTime) -> Sweeper {
        Sweeper::new(dir, policy()).with_clock(Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn test_policy_requires_interval_at_most_half_ttl() {
        assert!(RetentionPolicy::new(Duration::from_secs(120), Duration::from_secs(60)).is_ok());
        assert!(matches!(
            RetentionPolicy::new(Duration::from_secs(60), Duration::from_secs(120)),
            Err(Error::InvalidRetentionPolicy { .. })
        ));
        assert!(RetentionPolicy::new(Duration::from_secs(60), Duration::ZERO).is_err());
        assert!(RetentionPolicy::new(Duration::ZERO, Duration::ZERO).is_err());

        let default = RetentionPolicy::default();
        assert!(RetentionPolicy::new(default.ttl, default.sweep_interval).is_ok());
        assert_eq!(default.max_lifetime(), Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_deletes_only_files_strictly_older_than_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let one = Duration::from_secs(1);
        let fresh = touch(dir.path(), "fresh.png", now);
        let almost = touch(dir.path(), "almost.png", now - (TTL - one));
        let exact = touch(dir.path(), "exact.png", now - TTL);
        let stale = touch(dir.path(), "stale.png", now - (TTL + one));

        let report = sweeper_at(dir.path(), now).sweep_once();

        assert!(fresh.exists());
        assert!(almost.exists());
        assert!(exact.exists());
        assert!(!stale.exists());
        assert_eq!(report.scanned, 4);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.retained, 3);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_reserved_names_and_directories_survive() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let ancient = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        let keep = touch(dir.path(), ".gitkeep", ancient);
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        let report = sweeper_at(dir.path(), now).sweep_once();

        assert!(keep.exists());
        assert!(nested.is_dir());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.deleted, 0);
    }

    #[test]
    fn test_custom_reserved_names() {
        let dir = tempfile::tempdir().unwrap();
        let ancient = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        let gitkeep = touch(dir.path(), ".gitkeep", ancient);
        let placeholder = touch(dir.path(), "placeholder", ancient);

        let report = sweeper_at(dir.path(), SystemTime::now())
            .with_reserved(["placeholder"])
            .sweep_once();

        assert!(placeholder.exists());
        assert!(!gitkeep.exists());
        assert_eq!(report.deleted, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_failure_does_not_stop_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = now - (TTL + Duration::from_secs(30));
        let stale_a = touch(dir.path(), "a.png", old);
        let stale_b = touch(dir.path(), "b.png", old);
        let fresh = touch(dir.path(), "c.png", now);
        // A self-referencing link makes stat fail with ELOOP.
        let looped = dir.path().join("loop.png");
        std::os::unix::fs::symlink(&looped, &looped).unwrap();

        let report = sweeper_at(dir.path(), now).sweep_once();

        assert!(!stale_a.exists());
        assert!(!stale_b.exists());
        assert!(fresh.exists());
        assert_eq!(report.deleted, 2);
        assert_eq!(report.retained, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(&report.failures[0], SweepError::Stat { path, .. } if *path == looped));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_aged_by_the_link_itself() {
        let dir = tempfile::tempdir().unwrap();
        let dangling = dir.path().join("dead.png");
        std::os::unix::fs::symlink(dir.path().join("missing.png"), &dangling).unwrap();
        let now = SystemTime::now();

        let fresh = sweeper_at(dir.path(), now).sweep_once();
        assert_eq!(fresh.retained, 1);
        assert_eq!(fresh.vanished, 0);
        assert!(fs::symlink_metadata(&dangling).is_ok());

        let later = sweeper_at(dir.path(), now + TTL * 2).sweep_once();
        assert_eq!(later.deleted, 1);
        assert_eq!(later.vanished, 0);
        assert!(later.failures.is_empty());
        assert!(fs::symlink_metadata(&dangling).is_err());
    }

    fn refuse_a(path: &Path) -> io::Result<()> {
        if path.file_name().is_some_and(|n| n == "a.png") {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        fs::remove_file(path)
    }

    fn already_gone(path: &Path) -> io::Result<()> {
        fs::remove_file(path)?;
        Err(io::Error::from(io::ErrorKind::NotFound))
    }

    #[test]
    fn test_delete_failure_is_reported_and_tick_continues() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = now - (TTL + Duration::from_secs(30));
        let a = touch(dir.path(), "a.png", old);
        let b = touch(dir.path(), "b.png", old);
        let c = touch(dir.path(), "c.png", old);
        let mut sweeper = sweeper_at(dir.path(), now);
        sweeper.remove = refuse_a;

        let report = sweeper.sweep_once();

        assert!(a.exists());
        assert!(!b.exists());
        assert!(!c.exists());
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(&report.failures[0], SweepError::Delete { path, .. } if *path == a));
    }

    #[test]
    fn test_file_gone_before_delete_counts_as_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let stale = touch(dir.path(), "stale.png", now - TTL * 2);
        let mut sweeper = sweeper_at(dir.path(), now);
        sweeper.remove = already_gone;

        let report = sweeper.sweep_once();

        assert!(!stale.exists());
        assert_eq!(report.vanished, 1);
        assert_eq!(report.deleted, 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_second_tick_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(dir.path(), "old.png", now - (TTL * 2));
        let fresh = touch(dir.path(), "new.png", now);
        let sweeper = sweeper_at(dir.path(), now);

        let first = sweeper.sweep_once();
        let second = sweeper.sweep_once();

        assert_eq!(first.deleted, 1);
        assert_eq!(second.deleted, 0);
        assert_eq!(second.retained, 1);
        assert!(second.failures.is_empty());
        assert!(fresh.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_directory_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");

        let report = sweeper_at(&missing, SystemTime::now()).sweep_once();

        assert_eq!(report.scanned, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], SweepError::List { .. }));
    }

    #[test]
    fn test_future_mtime_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let ahead = touch(dir.path(), "ahead.png", now + Duration::from_secs(3600));

        let report = sweeper_at(dir.path(), now).sweep_once();

        assert!(ahead.exists());
        assert_eq!(report.retained, 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_sweeps_then_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let stale = touch(
            dir.path(),
            "stale.png",
            SystemTime::now() - Duration::from_secs(3 * 3600),
        );
        let (tx, rx) = watch::channel(false);
        let handle = Sweeper::new(dir.path(), RetentionPolicy::default()).spawn(rx);

        for _ in 0..100 {
            if !stale.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!stale.exists());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_false_signal_does_not_cut_the_interval_short() {
        let dir = tempfile::tempdir().unwrap();
        let ancient = SystemTime::now() - Duration::from_secs(3 * 3600);
        let first = touch(dir.path(), "first.png", ancient);
        let (tx, rx) = watch::channel(false);
        let handle = Sweeper::new(dir.path(), RetentionPolicy::default()).spawn(rx);

        for _ in 0..100 {
            if !first.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!first.exists());
        // Let the first tick finish its listing before planting another file.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = touch(dir.path(), "second.png", ancient);
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(second.exists());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = Sweeper::new(dir.path(), RetentionPolicy::default()).spawn(rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
