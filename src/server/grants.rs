//! Temporary upload and read links.
//!
//! A grant is an opaque uuid token mapped to the one object it unlocks and
//! an expiry instant. Expired grants are pruned whenever a new one is
//! issued.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_UPLOAD_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_READ_TTL: Duration = Duration::from_secs(3600);

/// What a grant allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// Write the document of `job_id` to `key`.
    Upload { job_id: JobId, key: String },
    /// Read the object at `key`.
    Read { key: String },
}

#[derive(Debug)]
struct Grant {
    access: Access,
    expires_at: Instant,
}

/// A freshly issued grant.
#[derive(Debug, Clone)]
pub struct IssuedGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct GrantStore {
    grants: Mutex<HashMap<String, Grant>>,
    upload_ttl: Duration,
    read_ttl: Duration,
}

impl GrantStore {
    pub fn new(upload_ttl: Duration, read_ttl: Duration) -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            upload_ttl,
            read_ttl,
        }
    }

    pub fn issue_upload(&self, job_id: JobId, key: String) -> IssuedGrant {
        self.issue(Access::Upload { job_id, key }, self.upload_ttl)
    }

    pub fn issue_read(&self, key: String) -> IssuedGrant {
        self.issue(Access::Read { key }, self.read_ttl)
    }

    fn issue(&self, access: Access, ttl: Duration) -> IssuedGrant {
        let mut grants = self.lock();
        let now = Instant::now();
        grants.retain(|_, g| now < g.expires_at);

        let token = uuid::Uuid::new_v4().to_string();
        grants.insert(
            token.clone(),
            Grant {
                access,
                expires_at: now + ttl,
            },
        );
        IssuedGrant {
            token,
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }

    /// The access a live `token` carries. Unknown and expired tokens give
    /// `None`.
    pub fn lookup(&self, token: &str) -> Option<Access> {
        let grants = self.lock();
        let grant = grants.get(token)?;
        if Instant::now() >= grant.expires_at {
            return None;
        }
        Some(grant.access.clone())
    }

    /// Job and key of a live upload grant.
    pub fn upload_target(&self, token: &str) -> Option<(JobId, String)> {
        match self.lookup(token)? {
            Access::Upload { job_id, key } => Some((job_id, key)),
            Access::Read { .. } => None,
        }
    }

    /// Key of a live read grant.
    pub fn read_target(&self, token: &str) -> Option<String> {
        match self.lookup(token)? {
            Access::Read { key } => Some(key),
            Access::Upload { .. } => None,
        }
    }

    /// Drop a grant once it has been used.
    pub fn revoke(&self, token: &str) {
        self.lock().remove(token);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Grant>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.grants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for GrantStore {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_TTL, DEFAULT_READ_TTL)
    }
}
