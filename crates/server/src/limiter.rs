//! Per-client pending-upload accounting.
//!
//! Tracks unpaid blobs per client IP and refuses new uploads once a client
//! parks too many. State is in-memory only: a restart forgives in-flight
//! pending blobs (the janitor still sweeps the blobs themselves).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    /// ip → (file_id → tracked_at).
    by_ip: HashMap<String, HashMap<String, Instant>>,
    /// file_id → ip. Reverse index; always the union of the per-IP sets.
    by_file: HashMap<String, String>,
}

/// Admission control for unpaid uploads, keyed by client IP.
pub struct PendingLimiter {
    max_pending: usize,
    inner: Mutex<Inner>,
}

impl PendingLimiter {
    /// Create a limiter allowing at most `max_pending` unpaid blobs per IP.
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Whether `ip` may start another upload.
    pub fn can_admit(&self, ip: &str) -> bool {
        let inner = self.lock();
        inner.by_ip.get(ip).map_or(0, HashMap::len) < self.max_pending
    }

    /// Number of pending blobs tracked for `ip`.
    pub fn pending_count(&self, ip: &str) -> usize {
        self.lock().by_ip.get(ip).map_or(0, HashMap::len)
    }

    /// The configured per-IP maximum.
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Record a pending blob for `ip`. Re-tracking an id is idempotent.
    pub fn track(&self, ip: &str, file_id: &str) {
        let mut inner = self.lock();
        inner
            .by_ip
            .entry(ip.to_string())
            .or_default()
            .insert(file_id.to_string(), Instant::now());
        inner.by_file.insert(file_id.to_string(), ip.to_string());
    }

    /// Stop tracking a blob, e.g. because its invoice settled. Unknown ids
    /// are a no-op (the entry may already have been swept).
    pub fn clear(&self, file_id: &str) {
        let mut inner = self.lock();
        let Some(ip) = inner.by_file.remove(file_id) else {
            return;
        };
        if let Some(files) = inner.by_ip.get_mut(&ip) {
            files.remove(file_id);
            if files.is_empty() {
                inner.by_ip.remove(&ip);
            }
        }
    }

    /// Remove every entry tracked longer than `max_age`. Returns the number
    /// of entries removed.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let mut removed = 0;

        let mut stale = Vec::new();
        for (ip, files) in &inner.by_ip {
            for (file_id, tracked_at) in files {
                if now.duration_since(*tracked_at) > max_age {
                    stale.push((ip.clone(), file_id.clone()));
                }
            }
        }

        for (ip, file_id) in stale {
            inner.by_file.remove(&file_id);
            if let Some(files) = inner.by_ip.get_mut(&ip) {
                files.remove(&file_id);
                if files.is_empty() {
                    inner.by_ip.remove(&ip);
                }
            }
            removed += 1;
        }

        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("pending limiter lock poisoned")
    }
}
