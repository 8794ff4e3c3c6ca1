use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Name of the lock file inside the state directory
pub const LOCK_FILE: &str = "issuetree.lock";

const MAX_WAIT_MS: u64 = 2000;
const INITIAL_BACKOFF_MS: u64 = 5;

/// Advisory lock held while the tree or focus file is compared and rewritten.
///
/// The lock file holds the owner's pid; a lock left behind by a dead process
/// is taken over.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock in `state_dir`, retrying with exponential backoff
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create {}", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILE);
        let pid = std::process::id();

        let mut backoff = INITIAL_BACKOFF_MS;
        let mut waited = 0;
        loop {
            match try_acquire(&path, pid) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if waited >= MAX_WAIT_MS => {
                    anyhow::bail!("Failed to acquire {} after {}ms: {}", path.display(), waited, e)
                }
                Err(e) => {
                    tracing::debug!(lock = %path.display(), error = %e, "lock busy, retrying");
                    thread::sleep(Duration::from_millis(backoff));
                    waited += backoff;
                    backoff = (backoff * 2).min(MAX_WAIT_MS.saturating_sub(waited).max(1));
                }
            }
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn try_acquire(path: &Path, pid: u32) -> Result<()> {
    if let Ok(content) = fs::read_to_string(path) {
        match content.trim().parse::<u32>() {
            Ok(owner) if owner != pid && is_process_alive(owner) => {
                anyhow::bail!("lock held by process {}", owner)
            }
            Ok(owner) if owner == pid => {
                anyhow::bail!("lock already held by this process")
            }
            _ => {
                tracing::warn!(lock = %path.display(), "removing stale lock");
                fs::remove_file(path).context("Failed to remove stale lock")?;
            }
        }
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .context("Failed to create lock file")?;
    use std::io::Write;
    write!(file, "{}", pid).context("Failed to write lock file")?;
    Ok(())
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use std::io;

    // Signal 0 probes for existence without delivering anything
    let result = unsafe { libc::kill(pid as i32, 0) };
    if result == 0 {
        true
    } else {
        io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

#[cfg(windows)]
fn is_process_alive(pid: u32) -> bool {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::OpenProcess;
    use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            false
        } else {
            CloseHandle(handle);
            true
        }
    }
}

#[cfg(not(any(unix, windows)))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
