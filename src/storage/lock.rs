//! Cross-process locking for a storage root
//!
//! Mutations serialize on a single lock per storage root. Two strategies
//! implement [`StoreLock`]:
//!
//! - [`PidFileLock`] (default): an exclusively created `.lock` marker that
//!   records the owner's process id. A marker whose process no longer
//!   exists is treated as stale and removed, so a crashed writer never
//!   wedges the store.
//! - [`OsFileLock`]: an OS advisory lock (`fs2`) on `.flock`, released by
//!   the kernel when the owner dies.
//!
//! Both only protect processes on the same host. The pid liveness probe in
//! particular is meaningless across machines; sharing a storage root over
//! a network filesystem is unsupported.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use super::error::{StoreError, StoreResult};
use super::root::StorageRoot;

/// Delay between attempts while another live process holds the lock
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive access to one storage root
pub trait StoreLock: Send + Sync + fmt::Debug {
    /// Blocks until the lock is held or `timeout` elapses
    fn acquire(&self, timeout: Duration) -> StoreResult<()>;

    /// Gives the lock up. Releasing a lock that is not held is a no-op.
    fn release(&self) -> StoreResult<()>;

    /// Clears leftovers of crashed owners; run once when a root is opened
    fn recover(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Which [`StoreLock`] implementation a storage root uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockStrategy {
    #[default]
    PidFile,
    OsAdvisory,
}

impl LockStrategy {
    /// Builds the lock for `root`
    pub fn build(self, root: &StorageRoot) -> Box<dyn StoreLock> {
        match self {
            LockStrategy::PidFile => Box::new(PidFileLock::new(root.lock_path())),
            LockStrategy::OsAdvisory => Box::new(OsFileLock::new(root.flock_path())),
        }
    }
}

/// Holds a [`StoreLock`] until dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a dyn StoreLock,
}

impl<'a> LockGuard<'a> {
    pub fn acquire(lock: &'a dyn StoreLock, timeout: Duration) -> StoreResult<Self> {
        lock.acquire(timeout)?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            log::warn!("Failed to release storage lock: {}", e);
        }
    }
}

/// Who, if anyone, holds a pid marker
#[derive(Debug, PartialEq, Eq)]
enum MarkerState {
    /// No marker on disk
    Absent,
    /// Owner process is running
    Live(u32),
    /// Owner process is gone or the marker is unreadable; holds the
    /// marker content as read
    Stale(String),
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Lock marker file containing the owner's process id
#[derive(Debug)]
pub struct PidFileLock {
    path: PathBuf,
    held: AtomicBool,
}

impl PidFileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: AtomicBool::new(false),
        }
    }

    /// Returns the marker path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this instance currently holds the lock
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Removes the marker at `path` if its owner no longer exists
    pub fn cleanup_stale(path: &Path) -> StoreResult<bool> {
        match read_marker(path) {
            MarkerState::Stale(seen) => remove_stale(path, &seen),
            _ => Ok(false),
        }
    }

    /// Atomically creates the marker with our pid already written, so no
    /// other process can observe an empty marker
    fn try_create(&self) -> StoreResult<bool> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let temp = parent.join(format!(
            ".lock.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp, std::process::id().to_string())
            .map_err(|e| StoreError::io(&temp, e))?;

        let linked = fs::hard_link(&temp, &self.path);
        let _ = fs::remove_file(&temp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

impl StoreLock for PidFileLock {
    fn acquire(&self, timeout: Duration) -> StoreResult<()> {
        let start = Instant::now();

        loop {
            if self.try_create()? {
                self.held.store(true, Ordering::SeqCst);
                log::debug!("Acquired lock {}", self.path.display());
                return Ok(());
            }

            match read_marker(&self.path) {
                // Released between our attempt and the read: retry now
                MarkerState::Absent => continue,
                MarkerState::Stale(seen) => {
                    remove_stale(&self.path, &seen)?;
                    continue;
                }
                MarkerState::Live(pid) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        log::debug!("Lock {} still held by pid {}", self.path.display(), pid);
                        return Err(StoreError::LockTimeout {
                            path: self.path.clone(),
                            timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
                }
            }
        }
    }

    fn release(&self) -> StoreResult<()> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Only remove the marker if it is still ours
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim() == std::process::id().to_string() => {
                force_remove(&self.path)?;
                log::debug!("Released lock {}", self.path.display());
            }
            Ok(_) => log::warn!("Lock {} was taken over before release", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&self.path, e)),
        }
        Ok(())
    }

    fn recover(&self) -> StoreResult<()> {
        Self::cleanup_stale(&self.path).map(|_| ())
    }
}

impl Drop for PidFileLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn read_marker(path: &Path) -> MarkerState {
    match fs::read_to_string(path) {
        Ok(content) => match content.trim().parse::<u32>() {
            Ok(pid) if is_process_running(pid) => MarkerState::Live(pid),
            _ => MarkerState::Stale(content),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => MarkerState::Absent,
        Err(_) => MarkerState::Stale(String::new()),
    }
}

/// Removes a stale marker, but only if it still holds `seen`
///
/// A contender that already replaced the dead marker with its own is left
/// alone. Two contenders that both observed the same dead marker can still
/// race between this re-read and the unlink; that window is one syscall
/// wide and is the residual cost of pid markers over OS locks.
fn remove_stale(path: &Path, seen: &str) -> StoreResult<bool> {
    match fs::read_to_string(path) {
        Ok(content) if content == seen => {}
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        // Unreadable markers cannot be compared; treat them as dead
        Err(_) => {}
    }

    log::warn!("Removing stale lock {}", path.display());
    force_remove(path)?;
    Ok(true)
}

fn force_remove(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Checks if a process with the given PID is running
pub fn is_process_running(pid: u32) -> bool {
    // pid 0 and negative values address process groups, not a process
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    #[cfg(unix)]
    {
        // Signal 0 performs the permission and existence checks only
        if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(windows)]
    {
        use std::process::{Command, Stdio};

        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        // Without a probe, never declare another owner dead
        true
    }
}

/// OS advisory lock on a dedicated file
#[derive(Debug)]
pub struct OsFileLock {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl OsFileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }
}

impl StoreLock for OsFileLock {
    fn acquire(&self, timeout: Duration) -> StoreResult<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(StoreError::LockTimeout {
                            path: self.path.clone(),
                            timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
                }
                Err(e) => return Err(StoreError::io(&self.path, e)),
            }
        }

        let mut slot = self.file.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(file);
        log::debug!("Acquired advisory lock {}", self.path.display());
        Ok(())
    }

    fn release(&self) -> StoreResult<()> {
        let mut slot = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(file) = slot.take() {
            file.unlock().map_err(|e| StoreError::io(&self.path, e))?;
        }
        Ok(())
    }
}
