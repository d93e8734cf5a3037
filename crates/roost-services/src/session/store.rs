//! Session-scoped staging registry.
//!
//! Each session is keyed by an opaque fixed-length token and holds the
//! uploads staged under it. Expiry slides with every access and is capped by
//! an absolute lifetime. All mutation of a session happens under its map
//! entry, so concurrent adds and removes on one token never interleave.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::distr::Alphanumeric;
use rand::Rng;
use roost_core::constants::SESSION_TOKEN_LENGTH;
use roost_core::{Config, StagedImage};
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::cookie::SessionCookie;
use crate::error::StagingError;

#[derive(Debug)]
struct SessionEntry {
    staged: Vec<StagedImage>,
    created_at: Instant,
    last_access: Instant,
}

impl SessionEntry {
    fn new(now: Instant) -> Self {
        Self {
            staged: Vec::new(),
            created_at: now,
            last_access: now,
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration, max_lifetime: Duration) -> bool {
        now.duration_since(self.last_access) > ttl
            || now.duration_since(self.created_at) > max_lifetime
    }
}

/// Result of [`TempSessionStore::get_or_create`].
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: String,
    /// Present when a new token was minted and must be sent to the client.
    pub cookie: Option<SessionCookie>,
}

impl SessionGrant {
    pub fn is_new(&self) -> bool {
        self.cookie.is_some()
    }
}

/// Aggregate counts from one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub sessions: usize,
    pub images: usize,
}

pub struct TempSessionStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
    max_lifetime: Duration,
    secure_cookies: bool,
}

fn generate_session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Shape check only: length and alphabet.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == SESSION_TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

impl TempSessionStore {
    pub fn new(ttl: Duration, max_lifetime: Duration, secure_cookies: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_lifetime: max_lifetime.max(ttl),
            secure_cookies,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.staging_ttl(),
            config.staging_max_lifetime(),
            !config.is_local(),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live session and refresh its sliding expiry.
    ///
    /// Expired entries found on the way are removed.
    fn touch(&self, session_id: &str) -> bool {
        if !is_well_formed(session_id) {
            return false;
        }
        let now = Instant::now();
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now, self.ttl, self.max_lifetime) {
                    entry.remove();
                    false
                } else {
                    entry.get_mut().last_access = now;
                    true
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Resolve the token carried by the client, minting a new session when
    /// it is absent, malformed, unknown or expired.
    pub fn get_or_create(&self, carrier: Option<&str>) -> SessionGrant {
        if let Some(token) = carrier {
            if self.touch(token) {
                return SessionGrant {
                    session_id: token.to_string(),
                    cookie: None,
                };
            }
        }

        let now = Instant::now();
        let session_id = loop {
            let candidate = generate_session_token();
            if let Entry::Vacant(slot) = self.sessions.entry(candidate.clone()) {
                slot.insert(SessionEntry::new(now));
                break candidate;
            }
        };

        tracing::debug!(
            had_carrier = carrier.is_some(),
            "Minted new staging session"
        );

        SessionGrant {
            cookie: Some(SessionCookie::new(
                session_id.clone(),
                self.ttl,
                self.secure_cookies,
            )),
            session_id,
        }
    }

    /// Record a staged upload. Returns `false` if the image id was already present.
    pub fn add(&self, session_id: &str, descriptor: StagedImage) -> Result<bool, StagingError> {
        if !self.touch(session_id) {
            return Err(StagingError::UnknownSession);
        }
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or(StagingError::UnknownSession)?;

        if entry
            .staged
            .iter()
            .any(|s| s.image_id == descriptor.image_id)
        {
            return Ok(false);
        }
        entry.staged.push(descriptor);
        Ok(true)
    }

    pub fn remove(&self, session_id: &str, image_id: Uuid) -> bool {
        if !self.touch(session_id) {
            return false;
        }
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                let before = entry.staged.len();
                entry.staged.retain(|s| s.image_id != image_id);
                entry.staged.len() != before
            }
            None => false,
        }
    }

    /// Staged uploads in arrival order; empty for unknown sessions.
    pub fn list(&self, session_id: &str) -> Vec<StagedImage> {
        if !self.touch(session_id) {
            return Vec::new();
        }
        self.sessions
            .get(session_id)
            .map(|entry| entry.staged.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, session_id: &str, image_id: Uuid) -> Option<StagedImage> {
        if !self.touch(session_id) {
            return None;
        }
        self.sessions.get(session_id).and_then(|entry| {
            entry
                .staged
                .iter()
                .find(|s| s.image_id == image_id)
                .cloned()
        })
    }

    pub fn is_valid(&self, session_id: &str) -> bool {
        self.touch(session_id)
    }

    /// Drop expired sessions. Best effort; staged blobs are left to the storage sweep.
    pub fn evict_expired(&self) -> EvictionReport {
        let now = Instant::now();
        let mut report = EvictionReport::default();

        self.sessions.retain(|_, entry| {
            if entry.is_expired(now, self.ttl, self.max_lifetime) {
                report.sessions += 1;
                report.images += entry.staged.len();
                false
            } else {
                true
            }
        });

        if report.sessions > 0 {
            tracing::info!(
                sessions = report.sessions,
                images = report.images,
                "Evicted expired staging sessions"
            );
        }
        report
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roost_core::ImageCategory;

    fn store() -> TempSessionStore {
        TempSessionStore::new(Duration::from_secs(3600), Duration::from_secs(7200), true)
    }

    fn staged(session_id: &str) -> StagedImage {
        StagedImage {
            image_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            category: ImageCategory::Gallery,
            mime_type: "image/jpeg".to_string(),
            original_file_name: "kitchen.jpg".to_string(),
            file_size_bytes: 1024,
            width: Some(100),
            height: Some(80),
            target_entity_id: None,
            staging_base: format!("temp/{}/gallery/new/x", session_id),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_carrier_mints_token_with_empty_list() {
        let store = store();
        let grant = store.get_or_create(None);

        assert!(grant.is_new());
        assert_eq!(grant.session_id.len(), SESSION_TOKEN_LENGTH);
        assert!(store.list(&grant.session_id).is_empty());
        assert!(store.is_valid(&grant.session_id));
        let cookie = grant.cookie.unwrap();
        assert!(cookie.http_only);
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, "Lax");
    }

    #[test]
    fn test_existing_token_is_reused() {
        let store = store();
        let first = store.get_or_create(None);
        let second = store.get_or_create(Some(&first.session_id));
        assert!(!second.is_new());
        assert_eq!(second.session_id, first.session_id);
    }

    #[test]
    fn test_malformed_or_unknown_token_is_replaced() {
        let store = store();
        let grant = store.get_or_create(Some("short"));
        assert!(grant.is_new());
        assert_ne!(grant.session_id, "short");

        let unknown = "a".repeat(SESSION_TOKEN_LENGTH);
        let grant = store.get_or_create(Some(&unknown));
        assert!(grant.is_new());
        assert_ne!(grant.session_id, unknown);
    }

    #[test]
    fn test_add_is_idempotent_by_image_id() {
        let store = store();
        let session = store.get_or_create(None).session_id;
        let image = staged(&session);

        assert!(store.add(&session, image.clone()).unwrap());
        assert!(!store.add(&session, image.clone()).unwrap());
        assert_eq!(store.list(&session), vec![image.clone()]);

        assert!(store.remove(&session, image.image_id));
        assert!(!store.remove(&session, image.image_id));
        assert!(store.list(&session).is_empty());
    }

    #[test]
    fn test_add_to_unknown_session_fails() {
        let store = store();
        let result = store.add(&"b".repeat(SESSION_TOKEN_LENGTH), staged("x"));
        assert!(matches!(result, Err(StagingError::UnknownSession)));
    }

    #[test]
    fn test_local_environment_disables_secure_flag() {
        let store = TempSessionStore::new(Duration::from_secs(60), Duration::from_secs(60), false);
        assert!(!store.get_or_create(None).cookie.unwrap().secure);
    }

    #[tokio::test]
    async fn test_sliding_ttl_and_eviction() {
        let store = TempSessionStore::new(
            Duration::from_millis(100),
            Duration::from_secs(60),
            true,
        );
        let kept = store.get_or_create(None).session_id;
        let dropped = store.get_or_create(None).session_id;
        store.add(&dropped, staged(&dropped)).unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(store.is_valid(&kept));
        }

        let report = store.evict_expired();
        assert_eq!(report, EvictionReport { sessions: 1, images: 1 });
        assert!(store.is_valid(&kept));
        assert!(!store.is_valid(&dropped));
    }

    #[tokio::test]
    async fn test_absolute_lifetime_caps_sliding_expiry() {
        let store = TempSessionStore::new(
            Duration::from_millis(200),
            Duration::from_millis(300),
            true,
        );
        let session = store.get_or_create(None).session_id;
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(store.is_valid(&session));
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!store.is_valid(&session));
    }
}
