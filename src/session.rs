//! Server-side sessions keyed by an opaque cookie token.
//!
//! A [`RequestContext`] is extracted per request and handed to handlers
//! explicitly; nothing about the caller lives in global state.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::auth::generate_token;
use crate::models::Role;

pub const SESSION_COOKIE: &str = "course_session";

/// The authenticated identity bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Info,
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
}

impl Flash {
    pub fn new(category: FlashCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);
pub const ANONYMOUS_SESSION_TTL: Duration = Duration::from_secs(10 * 60);
pub const MAX_ANONYMOUS_SESSIONS: usize = 1024;

#[derive(Debug)]
struct SessionEntry {
    identity: Option<Identity>,
    flashes: Vec<Flash>,
    last_seen: Instant,
}

impl SessionEntry {
    fn new(identity: Option<Identity>, flashes: Vec<Flash>, now: Instant) -> Self {
        Self {
            identity,
            flashes,
            last_seen: now,
        }
    }
}

/// Sessions idle past their TTL are dropped on access and pruned on every insert.
/// Anonymous sessions (flash carriers) get a short TTL and a hard cap.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
    anonymous_ttl: Duration,
    max_anonymous: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_TTL, ANONYMOUS_SESSION_TTL, MAX_ANONYMOUS_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, anonymous_ttl: Duration, max_anonymous: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            anonymous_ttl,
            max_anonymous: max_anonymous.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        let ttl = if entry.identity.is_some() {
            self.ttl
        } else {
            self.anonymous_ttl
        };
        now.saturating_duration_since(entry.last_seen) >= ttl
    }

    fn live_entry<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionEntry>,
        token: &str,
        now: Instant,
    ) -> Option<&'a mut SessionEntry> {
        let expired = self.is_expired(sessions.get(token)?, now);
        if expired {
            sessions.remove(token);
            return None;
        }
        let entry = sessions.get_mut(token)?;
        entry.last_seen = now;
        Some(entry)
    }

    fn prune(&self, sessions: &mut HashMap<String, SessionEntry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "expired sessions pruned");
        }
    }

    /// Makes room for one more anonymous session by evicting the least recently seen.
    fn evict_anonymous_overflow(&self, sessions: &mut HashMap<String, SessionEntry>) {
        let mut anonymous: Vec<(Instant, String)> = sessions
            .iter()
            .filter(|(_, entry)| entry.identity.is_none())
            .map(|(token, entry)| (entry.last_seen, token.clone()))
            .collect();
        if anonymous.len() < self.max_anonymous {
            return;
        }
        anonymous.sort();
        let excess = anonymous.len() + 1 - self.max_anonymous;
        for (_, token) in anonymous.into_iter().take(excess) {
            sessions.remove(&token);
        }
    }

    /// Returns `None` when the token is unknown or expired; `Some(None)` for an anonymous session.
    pub async fn lookup(&self, token: &str) -> Option<Option<Identity>> {
        let mut sessions = self.sessions.write().await;
        self.live_entry(&mut sessions, token, Instant::now())
            .map(|entry| entry.identity.clone())
    }

    /// Drops whatever session `previous` named and issues a fresh token for `identity`.
    pub async fn login(&self, previous: Option<&str>, identity: Identity) -> String {
        let token = generate_token();
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = previous {
            sessions.remove(previous);
        }
        self.prune(&mut sessions, now);
        sessions.insert(token.clone(), SessionEntry::new(Some(identity), Vec::new(), now));
        token
    }

    pub async fn logout(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Queues a flash on `token`'s session, creating an anonymous one when needed.
    /// Returns the token the client must carry afterwards.
    pub async fn push_flash(&self, token: Option<&str>, flash: Flash) -> String {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        if let Some(token) = token {
            if let Some(entry) = self.live_entry(&mut sessions, token, now) {
                entry.flashes.push(flash);
                return token.to_string();
            }
        }
        self.prune(&mut sessions, now);
        self.evict_anonymous_overflow(&mut sessions);
        let token = generate_token();
        sessions.insert(token.clone(), SessionEntry::new(None, vec![flash], now));
        token
    }

    pub async fn take_flashes(&self, token: Option<&str>) -> Vec<Flash> {
        let Some(token) = token else {
            return Vec::new();
        };
        let mut sessions = self.sessions.write().await;
        self.live_entry(&mut sessions, token, Instant::now())
            .map(|entry| std::mem::take(&mut entry.flashes))
            .unwrap_or_default()
    }
}

/// Per-request view of the caller's session.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub token: Option<String>,
    pub identity: Option<Identity>,
}

impl RequestContext {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Where to send the caller when a request cannot be completed.
    pub fn home_path(&self) -> &'static str {
        self.identity
            .as_ref()
            .map(|identity| identity.role.dashboard_path())
            .unwrap_or("/login")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    SessionStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let store = SessionStore::from_ref(state);
        let Some(token) = parse_cookie(&parts.headers, SESSION_COOKIE) else {
            return Ok(RequestContext::default());
        };
        match store.lookup(&token).await {
            Some(identity) => Ok(RequestContext {
                token: Some(token),
                identity,
            }),
            None => Ok(RequestContext::default()),
        }
    }
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token
    )
}
