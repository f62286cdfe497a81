//! Named, typed advisory locks.
//!
//! A lock is identified by a `(ResourceType, name)` pair rather than by the
//! data it protects, so lock granularity stays visible at every call site
//! (`playback:lobby`, `fade:lobby`, `announcement:sequencer`, ...).
//!
//! Locks are reentrant per thread: the owning thread may acquire the same key
//! again without blocking, and the key is only freed once every acquisition
//! has been released. Other threads wait on a condition variable until the
//! key is free or their timeout elapses.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::{Error, Result};

/// Default time a caller waits for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Kind of shared resource a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Channel,
    Track,
    Fade,
    Announcement,
    Playback,
}

impl ResourceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Track => "track",
            Self::Fade => "fade",
            Self::Announcement => "announcement",
            Self::Playback => "playback",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Thread currently holding the lock.
    pub owner: ThreadId,
    /// When the owner first acquired it.
    pub acquired_at: Instant,
    pub resource_type: ResourceType,
    pub resource_name: String,
    /// Number of nested acquisitions by the owner.
    pub depth: u32,
}

type LockKey = (ResourceType, String);

/// Table of named locks shared by every playback service.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<LockKey, LockInfo>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `(resource_type, name)`, waiting at most `timeout`.
    ///
    /// Succeeds immediately if the calling thread already owns the key.
    pub fn acquire(&self, resource_type: ResourceType, name: &str, timeout: Duration) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "empty resource name for {resource_type} lock"
            )));
        }

        let me = thread::current().id();
        let key = (resource_type, name.to_string());
        let deadline = Instant::now().checked_add(timeout);
        let mut table = self.table.lock();

        loop {
            match table.get_mut(&key) {
                None => {
                    table.insert(
                        key,
                        LockInfo {
                            owner: me,
                            acquired_at: Instant::now(),
                            resource_type,
                            resource_name: name.to_string(),
                            depth: 1,
                        },
                    );
                    trace!("Acquired {resource_type}:{name}");
                    return Ok(());
                }
                Some(info) if info.owner == me => {
                    info.depth += 1;
                    trace!("Re-entered {resource_type}:{name} (depth {})", info.depth);
                    return Ok(());
                }
                Some(_) => match deadline {
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            warn!("Timed out after {timeout:?} waiting for {resource_type}:{name}");
                            return Err(Error::lock_timeout(resource_type, name));
                        }
                        self.released.wait_until(&mut table, deadline);
                    }
                    None => self.released.wait(&mut table),
                },
            }
        }
    }

    /// Release one acquisition of `(resource_type, name)` held by this thread.
    pub fn release(&self, resource_type: ResourceType, name: &str) {
        let me = thread::current().id();
        let key = (resource_type, name.to_string());
        let mut table = self.table.lock();

        let freed = match table.get_mut(&key) {
            None => {
                debug!("Release of unheld lock {resource_type}:{name}");
                false
            }
            Some(info) if info.owner != me => {
                warn!(
                    "Thread {me:?} tried to release {resource_type}:{name} owned by {:?}",
                    info.owner
                );
                false
            }
            Some(info) => {
                info.depth -= 1;
                info.depth == 0
            }
        };

        if freed {
            table.remove(&key);
            drop(table);
            trace!("Released {resource_type}:{name}");
            self.released.notify_all();
        }
    }

    /// Acquire a lock that is released when the returned guard drops.
    pub fn lock(
        &self,
        resource_type: ResourceType,
        name: &str,
        timeout: Duration,
    ) -> Result<ResourceGuard<'_>> {
        self.acquire(resource_type, name, timeout)?;
        Ok(ResourceGuard {
            manager: self,
            resource_type,
            name: name.to_string(),
        })
    }

    /// Drop every held lock and wake all waiters. Used during shutdown.
    pub fn release_all_locks(&self) {
        let count = {
            let mut table = self.table.lock();
            let count = table.len();
            table.clear();
            count
        };
        self.released.notify_all();
        info!("Released all locks ({count} held)");
    }

    /// Check whether any thread holds `(resource_type, name)`.
    pub fn is_locked(&self, resource_type: ResourceType, name: &str) -> bool {
        self.table
            .lock()
            .contains_key(&(resource_type, name.to_string()))
    }

    /// Get details of a held lock.
    pub fn lock_info(&self, resource_type: ResourceType, name: &str) -> Option<LockInfo> {
        self.table
            .lock()
            .get(&(resource_type, name.to_string()))
            .cloned()
    }

    /// List every held lock, ordered by key.
    pub fn held_locks(&self) -> Vec<LockInfo> {
        let mut locks: Vec<LockInfo> = self.table.lock().values().cloned().collect();
        locks.sort_by(|a, b| {
            (a.resource_type, &a.resource_name).cmp(&(b.resource_type, &b.resource_name))
        });
        locks
    }
}

/// Scoped acquisition of a named lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ResourceGuard<'a> {
    manager: &'a LockManager,
    resource_type: ResourceType,
    name: String,
}

impl ResourceGuard<'_> {
    pub const fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.resource_type, &self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_acquire() {
        let locks = LockManager::new();
        locks
            .acquire(ResourceType::Playback, "p1", Duration::ZERO)
            .unwrap();
        locks
            .acquire(ResourceType::Playback, "p1", Duration::ZERO)
            .unwrap();
        assert_eq!(locks.lock_info(ResourceType::Playback, "p1").unwrap().depth, 2);

        locks.release(ResourceType::Playback, "p1");
        assert!(locks.is_locked(ResourceType::Playback, "p1"));
        locks.release(ResourceType::Playback, "p1");
        assert!(!locks.is_locked(ResourceType::Playback, "p1"));
    }

    #[test]
    fn test_contended_acquire_times_out_then_succeeds() {
        let locks = Arc::new(LockManager::new());
        locks
            .acquire(ResourceType::Playback, "p1", DEFAULT_LOCK_TIMEOUT)
            .unwrap();

        let contender = Arc::clone(&locks);
        let (elapsed, result) = thread::spawn(move || {
            let started = Instant::now();
            let result = contender.acquire(ResourceType::Playback, "p1", Duration::from_millis(100));
            (started.elapsed(), result)
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(Error::LockTimeout { .. })));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(900));

        locks.release(ResourceType::Playback, "p1");

        let contender = Arc::clone(&locks);
        let result = thread::spawn(move || {
            let result = contender.acquire(ResourceType::Playback, "p1", Duration::ZERO);
            contender.release(ResourceType::Playback, "p1");
            result
        })
        .join()
        .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let locks = Arc::new(LockManager::new());
        locks
            .acquire(ResourceType::Track, "lobby", DEFAULT_LOCK_TIMEOUT)
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = Arc::clone(&locks);
        let waiter = thread::spawn(move || {
            tx.send(()).unwrap();
            let started = Instant::now();
            let result = contender.acquire(ResourceType::Track, "lobby", Duration::from_secs(5));
            let owner = contender.lock_info(ResourceType::Track, "lobby").map(|i| i.owner);
            contender.release(ResourceType::Track, "lobby");
            (result, started.elapsed(), owner == Some(thread::current().id()))
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        locks.release(ResourceType::Track, "lobby");

        let (result, elapsed, owned) = waiter.join().unwrap();
        assert!(result.is_ok());
        assert!(owned);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_keys_are_independent() {
        let locks = Arc::new(LockManager::new());
        locks
            .acquire(ResourceType::Playback, "p1", Duration::ZERO)
            .unwrap();

        let contender = Arc::clone(&locks);
        let results = thread::spawn(move || {
            let fade = contender.acquire(ResourceType::Fade, "p1", Duration::ZERO);
            let other = contender.acquire(ResourceType::Playback, "p2", Duration::ZERO);
            (fade.is_ok(), other.is_ok())
        })
        .join()
        .unwrap();

        assert_eq!(results, (true, true));
    }

    #[test]
    fn test_empty_name_rejected() {
        let locks = LockManager::new();
        let result = locks.acquire(ResourceType::Channel, "", Duration::ZERO);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(locks.held_locks().is_empty());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let locks = Arc::new(LockManager::new());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _guard = locks
                .lock(ResourceType::Announcement, "sequencer", Duration::ZERO)
                .unwrap();
            panic!("announcement failed");
        }));
        assert!(outcome.is_err());
        assert!(!locks.is_locked(ResourceType::Announcement, "sequencer"));
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn guarded(locks: &LockManager, bail: bool) -> Result<u32> {
            let _guard = locks.lock(ResourceType::Fade, "lobby", Duration::ZERO)?;
            if bail {
                return Err(Error::Internal("bail".into()));
            }
            Ok(1)
        }

        let locks = LockManager::new();
        assert!(guarded(&locks, true).is_err());
        assert!(!locks.is_locked(ResourceType::Fade, "lobby"));
        assert_eq!(guarded(&locks, false).unwrap(), 1);
        assert!(!locks.is_locked(ResourceType::Fade, "lobby"));
    }

    #[test]
    fn test_release_by_other_thread_is_ignored() {
        let locks = Arc::new(LockManager::new());
        locks
            .acquire(ResourceType::Channel, "a", Duration::ZERO)
            .unwrap();

        let other = Arc::clone(&locks);
        thread::spawn(move || other.release(ResourceType::Channel, "a"))
            .join()
            .unwrap();

        assert!(locks.is_locked(ResourceType::Channel, "a"));
    }

    #[test]
    fn test_release_all_locks() {
        let locks = Arc::new(LockManager::new());
        let holder = Arc::clone(&locks);
        thread::spawn(move || {
            holder
                .acquire(ResourceType::Playback, "stuck", Duration::ZERO)
                .unwrap();
        })
        .join()
        .unwrap();
        locks
            .acquire(ResourceType::Fade, "mine", Duration::ZERO)
            .unwrap();
        assert_eq!(locks.held_locks().len(), 2);

        locks.release_all_locks();
        assert!(locks.held_locks().is_empty());
        assert!(locks
            .acquire(ResourceType::Playback, "stuck", Duration::ZERO)
            .is_ok());
    }

    #[test]
    fn test_held_locks_sorted() {
        let locks = LockManager::new();
        let _b = locks
            .lock(ResourceType::Playback, "b", Duration::ZERO)
            .unwrap();
        let _a = locks
            .lock(ResourceType::Channel, "a", Duration::ZERO)
            .unwrap();

        let held = locks.held_locks();
        assert_eq!(held[0].resource_type, ResourceType::Channel);
        assert_eq!(held[1].resource_name, "b");
    }
}
