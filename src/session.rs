// Identity and session directories: account keys, per-game session IDs and
// tokens, and the registry of live sessions. One reader/writer lock guards
// all four maps; login and join take the writer, validation reads share.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::auth;

/// One game session. Records stay after the session ends (marked inactive)
/// so a dead session's token still resolves and `move` can answer
/// "not found" instead of "forbidden".
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub uid: String,
    pub token: String,
    pub active: bool,
}

/// Freshly minted credentials for a joined session.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    /// The account already has a live session in this game.
    AlreadyInGame,
}

#[derive(Default)]
struct Directories {
    uid_to_key: HashMap<String, String>,
    key_to_uid: HashMap<String, String>,
    token_to_session: HashMap<String, String>,
    sessions: HashMap<String, SessionRecord>,
}

pub struct SessionService {
    inner: RwLock<Directories>,
}

impl SessionService {
    pub fn new() -> Self {
        SessionService {
            inner: RwLock::new(Directories::default()),
        }
    }

    // --- Account keys ---

    /// Cache a uid/key pair. An older key for the same uid is evicted, which
    /// is how a key rotation invalidates the previous key.
    pub fn cache_key(&self, uid: &str, key: &str) {
        let mut dirs = self.inner.write().unwrap();
        if let Some(old) = dirs.uid_to_key.insert(uid.to_string(), key.to_string()) {
            dirs.key_to_uid.remove(&old);
        }
        dirs.key_to_uid.insert(key.to_string(), uid.to_string());
    }

    /// O(1) key -> uid lookup against the in-memory cache.
    pub fn validate_key(&self, key: &str) -> Option<String> {
        self.inner.read().unwrap().key_to_uid.get(key).cloned()
    }

    // --- Sessions ---

    /// Start a session for a validated account: rejects a uid that already
    /// has a live session, then mints a fresh session ID and token.
    pub fn begin_session(&self, uid: &str) -> Result<NewSession, SessionError> {
        let mut dirs = self.inner.write().unwrap();
        if dirs.sessions.values().any(|s| s.uid == uid && s.active) {
            return Err(SessionError::AlreadyInGame);
        }

        let mut session_id = auth::generate_session_id(uid);
        while dirs.sessions.contains_key(&session_id) {
            session_id = auth::generate_session_id(uid);
        }
        let token = auth::generate_token(&session_id);

        dirs.token_to_session
            .insert(token.clone(), session_id.clone());
        dirs.sessions.insert(
            session_id.clone(),
            SessionRecord {
                uid: uid.to_string(),
                token: token.clone(),
                active: true,
            },
        );
        Ok(NewSession { session_id, token })
    }

    /// Insert a session with caller-chosen credentials. Join goes through
    /// `begin_session`; this entry point exists for tests and recovery.
    pub fn install_session(&self, uid: &str, session_id: &str, token: &str) {
        let mut dirs = self.inner.write().unwrap();
        dirs.token_to_session
            .insert(token.to_string(), session_id.to_string());
        dirs.sessions.insert(
            session_id.to_string(),
            SessionRecord {
                uid: uid.to_string(),
                token: token.to_string(),
                active: true,
            },
        );
    }

    /// O(1) token -> session ID lookup.
    pub fn validate_token(&self, token: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .token_to_session
            .get(token)
            .cloned()
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner.read().unwrap().sessions.get(session_id).cloned()
    }

    pub fn is_session_active(&self, session_id: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .sessions
            .get(session_id)
            .map(|s| s.active)
            .unwrap_or(false)
    }

    pub fn has_active_session(&self, uid: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .sessions
            .values()
            .any(|s| s.uid == uid && s.active)
    }

    /// Mark a session as ended (snake died or player left). The record and
    /// its token mapping survive, so the uid may start a new session while
    /// the old token keeps resolving to the dead one.
    pub fn end_session(&self, session_id: &str) {
        let mut dirs = self.inner.write().unwrap();
        if let Some(record) = dirs.sessions.get_mut(session_id) {
            record.active = false;
        }
    }

    /// Drop a session entirely, token mapping included.
    pub fn remove_session(&self, session_id: &str) {
        let mut dirs = self.inner.write().unwrap();
        if let Some(record) = dirs.sessions.remove(session_id) {
            dirs.token_to_session.remove(&record.token);
        }
    }

    /// Clear all sessions but keep the account key cache, so accounts can
    /// rejoin without logging in again.
    pub fn remove_all_sessions(&self) {
        let mut dirs = self.inner.write().unwrap();
        dirs.sessions.clear();
        dirs.token_to_session.clear();
    }

    pub fn live_session_count(&self) -> usize {
        self.inner
            .read()
            .unwrap()
            .sessions
            .values()
            .filter(|s| s.active)
            .count()
    }

    pub fn list_live_sessions(&self) -> Vec<String> {
        let dirs = self.inner.read().unwrap();
        let mut live: Vec<String> = dirs
            .sessions
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(id, _)| id.clone())
            .collect();
        live.sort();
        live
    }
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new()
    }
}
