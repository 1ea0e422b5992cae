//! Debounced on-disk lease state.
//!
//! The store is written as pretty-printed JSON `{ byIp, byClientId }` with
//! sorted keys. A write happens when either:
//!
//! - more than the configured interval has passed since the last write, or
//! - the store was marked dirty, which resets the last-write time to the
//!   epoch and so forces the next write.
//!
//! Saves that fall inside the interval schedule a trailing write for the end
//! of the window, replacing any trailing write already pending. Writes run on
//! detached tasks; the caller never awaits disk I/O while holding the store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::Result;
use crate::lease::{LeaseStore, PersistedStore};

/// Outcome of a [`LeaseFile::save`] call.
#[derive(Debug)]
pub enum SaveAttempt {
    /// Writing to disk is turned off.
    Disabled,
    /// A write was started; the handle completes once it has finished.
    Written(JoinHandle<()>),
    /// Inside the debounce window; a trailing write is pending.
    Deferred,
    /// No async runtime was available to run the write.
    Skipped,
}

#[derive(Debug)]
struct Schedule {
    last_write: SystemTime,
    trailing: Option<JoinHandle<()>>,
}

/// The lease state file plus its write-debounce bookkeeping.
#[derive(Debug)]
pub struct LeaseFile {
    path: PathBuf,
    enabled: bool,
    interval: Duration,
    schedule: Mutex<Schedule>,
    /// Serialises writers so the file always ends up with the newest snapshot.
    write_lock: tokio::sync::Mutex<()>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LeaseFile {
    pub fn new(path: impl Into<PathBuf>, enabled: bool, interval: Duration) -> Self {
        Self {
            path: path.into(),
            enabled,
            interval,
            schedule: Mutex::new(Schedule {
                last_write: UNIX_EPOCH,
                trailing: None,
            }),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.state_file,
            config.write_to_disk,
            Duration::from_secs(config.persist_interval_seconds),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted store. A missing file is an empty store.
    pub async fn load(&self) -> Result<PersistedStore> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("No lease state at {}", self.path.display());
            return Ok(PersistedStore::default());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Forces the next [`save`](Self::save) to write.
    pub fn mark_dirty(&self) {
        lock(&self.schedule).last_write = UNIX_EPOCH;
    }

    /// True when the next save will write regardless of the interval.
    pub fn is_forced(&self) -> bool {
        lock(&self.schedule).last_write == UNIX_EPOCH
    }

    /// Persists `state` if the debounce policy allows it.
    ///
    /// Decides synchronously; the write itself runs on a spawned task.
    pub fn save(self: &Arc<Self>, state: &Arc<Mutex<LeaseStore>>) -> SaveAttempt {
        if !self.enabled {
            return SaveAttempt::Disabled;
        }
        let Ok(runtime) = Handle::try_current() else {
            return SaveAttempt::Skipped;
        };

        let mut schedule = lock(&self.schedule);
        let now = SystemTime::now();
        let elapsed = now
            .duration_since(schedule.last_write)
            .unwrap_or_default();

        if schedule.last_write == UNIX_EPOCH || elapsed > self.interval {
            schedule.last_write = now;
            if let Some(trailing) = schedule.trailing.take() {
                trailing.abort();
            }
            drop(schedule);

            let file = Arc::clone(self);
            let state = Arc::clone(state);
            return SaveAttempt::Written(runtime.spawn(async move {
                file.write_logged(&state).await;
            }));
        }

        let remaining = self.interval.saturating_sub(elapsed);
        if let Some(previous) = schedule.trailing.take() {
            previous.abort();
        }
        let file = Arc::clone(self);
        let state = Arc::clone(state);
        schedule.trailing = Some(runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            {
                let mut schedule = lock(&file.schedule);
                schedule.last_write = SystemTime::now();
                schedule.trailing = None;
            }
            file.write_logged(&state).await;
        }));
        SaveAttempt::Deferred
    }

    async fn write_logged(&self, state: &Mutex<LeaseStore>) {
        if let Err(err) = self.write(state).await {
            error!(
                "Failed to persist leases to {}: {}",
                self.path.display(),
                err
            );
        }
    }

    /// Writes the current contents of `state` immediately.
    ///
    /// The snapshot goes to a sibling file that is then renamed over the
    /// target, so readers never see a partial write.
    pub async fn write(&self, state: &Mutex<LeaseStore>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let content = {
            let store = lock(state);
            serde_json::to_string_pretty(&store.to_persisted())?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!("Lease state written to {}", self.path.display());
        Ok(())
    }

    /// Writes now, cancelling any trailing write. Used on shutdown.
    pub async fn flush(&self, state: &Mutex<LeaseStore>) -> Result<()> {
        {
            let mut schedule = lock(&self.schedule);
            if let Some(trailing) = schedule.trailing.take() {
                trailing.abort();
            }
            schedule.last_write = SystemTime::now();
        }
        if !self.enabled {
            return Ok(());
        }
        self.write(state).await
    }
}
