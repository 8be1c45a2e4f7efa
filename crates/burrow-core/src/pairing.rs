//! Pairing authority: the server's single shared secret and the set of
//! connected sessions.
//!
//! One code authorizes everything; rotation invalidates the code for new
//! joiners immediately but never tears down sessions that were authorized
//! before the rotation. All mutation of the code and the session set goes
//! through this type.

use crate::error::{BurrowError, Result};
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::info;
use uuid::Uuid;

/// Length of a pairing code in characters.
pub const PAIRING_CODE_LEN: usize = 6;

/// One authorized client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub client_app: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// Pairing generation this session was authorized under.
    pub generation: u64,
    #[serde(skip)]
    last_seen: Option<SeenAt>,
}

#[derive(Debug, Clone, Copy)]
struct SeenAt(Instant);

impl Default for SeenAt {
    fn default() -> Self {
        Self(Instant::now())
    }
}

/// Issues, validates and rotates the pairing code, and tracks active
/// connections.
pub struct PairingAuthority {
    code: RwLock<String>,
    generation: AtomicU64,
    sessions: Mutex<Vec<Session>>,
    idle_timeout: Duration,
}

impl PairingAuthority {
    /// Create the authority with a freshly generated code.
    pub fn new(idle_timeout: Duration) -> Self {
        let code = generate_code();
        info!("pairing code issued");
        Self {
            code: RwLock::new(code),
            generation: AtomicU64::new(0),
            sessions: Mutex::new(Vec::new()),
            idle_timeout,
        }
    }

    /// The currently valid code.
    pub fn current_code(&self) -> String {
        self.code
            .read()
            .map(|code| code.clone())
            .unwrap_or_default()
    }

    /// Constant-time check against the current code. Rotated-out codes are
    /// never valid.
    pub fn validate(&self, presented: &str) -> bool {
        let current = self.current_code();
        current.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    /// Rotation generation, bumped on every regenerate.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace the code, invalidating the previous one for new
    /// authorizations. Existing sessions are untouched.
    pub fn regenerate(&self) -> String {
        let new_code = generate_code();
        if let Ok(mut code) = self.code.write() {
            *code = new_code.clone();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("pairing code rotated");
        new_code
    }

    /// Authorize a new connection session. Fails with `Unauthorized` on a
    /// bad or rotated code, without touching the connection count.
    pub fn open_session(
        &self,
        presented: &str,
        client_app: &str,
        database: Option<&str>,
    ) -> Result<Session> {
        if !self.validate(presented) {
            return Err(BurrowError::Unauthorized);
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            client_app: client_app.to_string(),
            database: database.map(str::to_string),
            connected_at: Utc::now(),
            generation: self.generation(),
            last_seen: Some(SeenAt::default()),
        };

        if let Ok(mut sessions) = self.sessions.lock() {
            let idle_timeout = self.idle_timeout;
            sessions.retain(|s| is_live(s, idle_timeout));
            sessions.push(session.clone());
        }
        Ok(session)
    }

    /// Close a session explicitly. Returns whether it existed.
    pub fn close_session(&self, id: &str) -> bool {
        match self.sessions.lock() {
            Ok(mut sessions) => {
                let before = sessions.len();
                sessions.retain(|s| s.id != id);
                sessions.len() < before
            }
            Err(_) => false,
        }
    }

    /// Refresh a session's idle clock. Returns false for unknown sessions and
    /// for sessions already idle past the timeout, which are dropped here
    /// rather than kept alive by the touch.
    pub fn touch_session(&self, id: &str) -> bool {
        match self.sessions.lock() {
            Ok(mut sessions) => {
                let idle_timeout = self.idle_timeout;
                sessions.retain(|s| is_live(s, idle_timeout));
                match sessions.iter_mut().find(|s| s.id == id) {
                    Some(session) => {
                        session.last_seen = Some(SeenAt::default());
                        true
                    }
                    None => false,
                }
            }
            Err(_) => false,
        }
    }

    /// Number of live sessions. Read-only: expired sessions are excluded from
    /// the count here and physically removed on the next mutating call.
    /// Never negative by construction.
    pub fn active_connections(&self) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions
                .iter()
                .filter(|s| is_live(s, self.idle_timeout))
                .count(),
            Err(_) => 0,
        }
    }

    /// Snapshot of live sessions for the status surface.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|s| is_live(s, self.idle_timeout))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn is_live(session: &Session, idle_timeout: Duration) -> bool {
    session
        .last_seen
        .map(|seen| seen.0.elapsed() < idle_timeout)
        .unwrap_or(false)
}

/// Generate a pairing code: uppercase alphanumeric, fixed length.
fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PAIRING_CODE_LEN)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect()
}
