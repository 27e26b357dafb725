//! File-based sliding-window rate limiter.
//!
//! Request timestamps live in a small JSON file guarded by an exclusive
//! `flock`, so every thread and every process that uses the same limiter name
//! shares one budget. Parallel experiments hitting the same public API
//! therefore stay under its published limit together.
//!
//! State file format: `{"requests": [1712345678.12, ...]}` (UNIX seconds).
//! A state file that cannot be parsed is treated as empty (full capacity).

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LimiterState {
    requests: Vec<f64>,
}

/// Cross-process rate limiter backed by a locked state file.
#[derive(Debug, Clone)]
pub struct FileBasedRateLimiter {
    max_requests: u32,
    time_window: Duration,
    state_file: PathBuf,
}

impl FileBasedRateLimiter {
    /// Create a limiter whose state lives in the OS temp dir.
    pub fn new(max_requests: u32, time_window: Duration, name: &str) -> Result<Self> {
        Self::with_state_dir(max_requests, time_window, name, &std::env::temp_dir())
    }

    /// Create a limiter whose state file is `<dir>/<name>_rate_limiter.json`.
    pub fn with_state_dir(
        max_requests: u32,
        time_window: Duration,
        name: &str,
        dir: &Path,
    ) -> Result<Self> {
        if max_requests == 0 {
            return Err(Error::InvalidArgument(format!(
                "max_requests must be a positive integer, got {}",
                max_requests
            )));
        }
        if time_window.is_zero() {
            return Err(Error::InvalidArgument(format!(
                "time_window must be a positive number, got {:?}",
                time_window
            )));
        }
        Ok(Self {
            max_requests,
            time_window,
            state_file: dir.join(format!("{}_rate_limiter.json", name)),
        })
    }

    /// Build a limiter for a named service from its config entry.
    pub fn from_config(name: &str, config: &RateLimitConfig) -> Result<Self> {
        if !config.time_window_secs.is_finite() || config.time_window_secs <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "time_window must be a positive number, got {}",
                config.time_window_secs
            )));
        }
        let dir = config
            .state_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Self::with_state_dir(config.max_requests, config.time_window()?, name, &dir)
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Acquire a slot without blocking the async runtime.
    pub async fn acquire(&self) -> Result<Duration> {
        let limiter = self.clone();
        tokio::task::spawn_blocking(move || limiter.acquire_blocking())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Acquire a slot, sleeping the calling thread while the window is full.
    ///
    /// Returns how long the caller was held back. If the state file cannot be
    /// created or opened the request proceeds unthrottled.
    pub fn acquire_blocking(&self) -> Result<Duration> {
        let mut file = match self.open_state_file() {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    state_file = %self.state_file.display(),
                    error = %e,
                    "failed to open rate limiter state, proceeding without rate limiting"
                );
                return Ok(Duration::ZERO);
            }
        };

        let _lock = match FileLock::exclusive(&file) {
            Ok(lock) => lock,
            Err(e) => {
                warn!(
                    state_file = %self.state_file.display(),
                    error = %e,
                    "failed to lock rate limiter state, proceeding without rate limiting"
                );
                return Ok(Duration::ZERO);
            }
        };

        let mut state = self.read_state(&mut file);
        let window = self.time_window.as_secs_f64();
        let mut now = unix_now();
        state.requests.retain(|t| now - t < window);

        let mut waited = Duration::ZERO;
        if state.requests.len() >= self.max_requests as usize {
            let oldest = state
                .requests
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min);
            let wait = window - (now - oldest);
            if wait > 0.0 {
                // a future timestamp in a shared state file never waits past one window
                waited = Duration::try_from_secs_f64(wait)
                    .unwrap_or(self.time_window)
                    .min(self.time_window);
                debug!(
                    state_file = %self.state_file.display(),
                    wait_ms = waited.as_millis() as u64,
                    "rate limit reached, waiting"
                );
                std::thread::sleep(waited);
                now = unix_now();
                state.requests.retain(|t| now - t < window);
            }
        }

        state.requests.push(now);
        self.write_state(&mut file, &state)?;
        Ok(waited)
    }

    fn open_state_file(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.state_file)
    }

    fn read_state(&self, file: &mut File) -> LimiterState {
        let mut raw = Vec::new();
        if let Err(e) = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut raw))
        {
            warn!(error = %e, "failed to read rate limiter state, resetting to full capacity");
            return LimiterState::default();
        }
        match parse_state(&raw) {
            Ok(state) => state,
            Err(reason) => {
                warn!(
                    state_file = %self.state_file.display(),
                    reason = %reason,
                    "corrupted rate limiter state, resetting to full capacity"
                );
                LimiterState::default()
            }
        }
    }

    fn write_state(&self, file: &mut File, state: &LimiterState) -> Result<()> {
        let data = serde_json::to_vec(state)?;
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(&data)?;
        file.flush()?;
        Ok(())
    }
}

/// Parse and validate raw state bytes. Empty content is a fresh state.
fn parse_state(raw: &[u8]) -> std::result::Result<LimiterState, String> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[..end]);
    let text = text.trim();
    if text.is_empty() {
        return Ok(LimiterState::default());
    }

    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let obj = value.as_object().ok_or("state is not an object")?;
    let requests = obj
        .get("requests")
        .ok_or("state missing 'requests' key")?
        .as_array()
        .ok_or("'requests' is not a list")?;

    let mut out = Vec::with_capacity(requests.len());
    for ts in requests {
        match ts.as_f64() {
            Some(t) if t.is_finite() => out.push(t),
            _ => return Err(format!("invalid timestamp: {}", ts)),
        }
    }
    Ok(LimiterState { requests: out })
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Exclusive advisory lock released on drop.
struct FileLock {
    #[cfg(unix)]
    fd: std::os::unix::io::RawFd,
}

impl FileLock {
    #[cfg(unix)]
    fn exclusive(file: &File) -> std::io::Result<Self> {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: `fd` belongs to an open file that outlives the guard.
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    #[cfg(not(unix))]
    fn exclusive(_file: &File) -> std::io::Result<Self> {
        Ok(Self {})
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        // SAFETY: see `exclusive`; the guard is dropped before the file.
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}
