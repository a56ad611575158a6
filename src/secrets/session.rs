//! Session-scoped secret storage and cryptography.
//!
//! Every processed request gets its own session: a fresh ChaCha20-Poly1305
//! key with a bounded lifetime plus the mapping from opaque marker ids to the
//! original credentials. Encryption binds a plaintext to its session; the
//! opaque id embeds nonce and ciphertext, so decryption authenticates the id
//! itself.
//!
//! Decryption fails **closed**: an unknown session, an expired key, or a
//! tampered ciphertext yields `None` and never raises past the caller — the
//! correct behavior upstream is to leave the marker redacted.
//!
//! Sessions are wiped (key zeroed, mappings cleared) when the response stream
//! is fully consumed. [`SessionGuard`] makes that wipe run on *every* exit
//! path, including cancellation, by tying it to drop.

use super::error::SecretsError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use uuid::Uuid;

/// A credential recorded in its session.
#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    /// Session the secret belongs to.
    pub session: Uuid,
    /// Opaque ciphertext identifier (as embedded in the marker).
    pub opaque_id: String,
    /// Original plaintext.
    pub plaintext: String,
    /// Service the credential belongs to.
    pub service: String,
    /// Credential type within the service.
    pub kind: String,
}

/// Per-session state: key material plus recorded secrets.
struct SessionState {
    key: [u8; 32],
    created_at: Instant,
    secrets: HashMap<String, EncryptedSecret>,
}

impl SessionState {
    /// Overwrite the key before the state is dropped.
    fn wipe(&mut self) {
        self.key.iter_mut().for_each(|b| *b = 0);
        self.secrets.clear();
    }
}

/// Registry of live secrets sessions.
///
/// One instance per process, constructed by the composition root and handed
/// to consumers explicitly. All mutation goes through a single mutex; reads
/// that need iteration safety copy out.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, SessionState>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store whose session keys live at most `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a new session and return its id.
    pub fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        let key: [u8; 32] = ChaCha20Poly1305::generate_key(&mut OsRng).into();

        self.sessions.lock().unwrap().insert(
            id,
            SessionState {
                key,
                created_at: Instant::now(),
                secrets: HashMap::new(),
            },
        );

        trace!("Created secrets session {id}");
        id
    }

    /// Encrypt `plaintext` under the session key and record it.
    ///
    /// Returns the opaque id embedded into the redaction marker:
    /// URL-safe base64 (no padding) of `nonce ‖ ciphertext`.
    ///
    /// # Errors
    ///
    /// Fails if the session is unknown/expired or encryption fails.
    pub fn encrypt(
        &self,
        session: Uuid,
        plaintext: &str,
        service: &str,
        kind: &str,
    ) -> Result<String, SecretsError> {
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions
            .get_mut(&session)
            .filter(|s| s.created_at.elapsed() <= self.ttl)
            .ok_or(SecretsError::UnknownSession(session))?;

        let nonce_source = Uuid::new_v4().into_bytes();
        let nonce = Nonce::from_slice(&nonce_source[..12]);

        let aead = ChaCha20Poly1305::new_from_slice(&state.key)
            .map_err(|e| SecretsError::Encryption(e.to_string()))?;
        let ciphertext = aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretsError::Encryption(e.to_string()))?;

        let mut envelope = Vec::with_capacity(12 + ciphertext.len());
        envelope.extend_from_slice(&nonce_source[..12]);
        envelope.extend_from_slice(&ciphertext);
        let opaque_id = URL_SAFE_NO_PAD.encode(envelope);

        state.secrets.insert(
            opaque_id.clone(),
            EncryptedSecret {
                session,
                opaque_id: opaque_id.clone(),
                plaintext: plaintext.to_string(),
                service: service.to_string(),
                kind: kind.to_string(),
            },
        );

        Ok(opaque_id)
    }

    /// Resolve an opaque id back to its plaintext.
    ///
    /// Fails closed: unknown session, expired key, malformed id, or tampered
    /// ciphertext all yield `None`.
    pub fn decrypt(&self, session: Uuid, opaque_id: &str) -> Option<String> {
        let sessions = self.sessions.lock().unwrap();
        let state = sessions
            .get(&session)
            .filter(|s| s.created_at.elapsed() <= self.ttl)?;

        let envelope = URL_SAFE_NO_PAD.decode(opaque_id.as_bytes()).ok()?;
        if envelope.len() <= 12 {
            return None;
        }
        let (nonce_raw, ciphertext) = envelope.split_at(12);

        let aead = ChaCha20Poly1305::new_from_slice(&state.key).ok()?;
        let plaintext = aead
            .decrypt(Nonce::from_slice(nonce_raw), ciphertext)
            .ok()?;

        String::from_utf8(plaintext).ok()
    }

    /// Wipe a session: zero the key, clear the mapping, remove the entry.
    ///
    /// Idempotent; wiping an unknown session is a no-op.
    pub fn end_session(&self, session: Uuid) {
        if let Some(mut state) = self.sessions.lock().unwrap().remove(&session) {
            state.wipe();
            debug!("Wiped secrets session {session}");
        }
    }

    /// Drop sessions whose key lifetime elapsed. Returns how many were wiped.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, s)| s.created_at.elapsed() > self.ttl)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(mut state) = sessions.remove(id) {
                state.wipe();
            }
        }
        expired.len()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Recorded secrets for a session (deep copy).
    pub fn secrets_for(&self, session: Uuid) -> Vec<EncryptedSecret> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session)
            .map(|s| s.secrets.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// RAII wipe for a secrets session.
///
/// Owned by the task consuming the response stream; dropping it — normal
/// completion, error, or cancellation — ends the session.
pub struct SessionGuard {
    store: Arc<SessionStore>,
    session: Uuid,
}

impl SessionGuard {
    /// Tie `session` to the lifetime of the returned guard.
    pub fn new(store: Arc<SessionStore>, session: Uuid) -> Self {
        Self { store, session }
    }

    /// The guarded session id.
    pub fn session(&self) -> Uuid {
        self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.store.end_session(self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let store = store();
        let session = store.create_session();

        let id = store
            .encrypt(session, "ghp_secrettoken", "github", "personal-access-token")
            .unwrap();
        assert_eq!(store.decrypt(session, &id), Some("ghp_secrettoken".into()));
    }

    #[test]
    fn test_decrypt_wrong_session_fails_closed() {
        let store = store();
        let session_a = store.create_session();
        let session_b = store.create_session();

        let id = store.encrypt(session_a, "secret", "acme", "token").unwrap();
        assert_eq!(store.decrypt(session_b, &id), None);
    }

    #[test]
    fn test_decrypt_after_wipe_fails_closed() {
        let store = store();
        let session = store.create_session();
        let id = store.encrypt(session, "secret", "acme", "token").unwrap();

        store.end_session(session);
        assert_eq!(store.decrypt(session, &id), None);
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_decrypt_tampered_id_fails_closed() {
        let store = store();
        let session = store.create_session();
        let id = store.encrypt(session, "secret", "acme", "token").unwrap();

        let mut tampered = id.clone();
        tampered.pop();
        tampered.push(if id.ends_with('A') { 'B' } else { 'A' });

        assert_eq!(store.decrypt(session, &tampered), None);
        assert_eq!(store.decrypt(session, "not base64 at all!"), None);
    }

    #[test]
    fn test_expired_session_fails_closed() {
        let store = SessionStore::new(Duration::from_millis(0));
        let session = store.create_session();
        // TTL zero: the key is expired by the time encrypt runs.
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(
            store.encrypt(session, "secret", "acme", "token"),
            Err(SecretsError::UnknownSession(_))
        ));
        assert_eq!(store.decrypt(session, "anything"), None);
        assert_eq!(store.sweep_expired(), 1);
    }

    #[test]
    fn test_session_guard_wipes_on_drop() {
        let store = Arc::new(store());
        let session = store.create_session();
        let id = store.encrypt(session, "secret", "acme", "token").unwrap();

        {
            let _guard = SessionGuard::new(store.clone(), session);
            assert_eq!(store.decrypt(session, &id), Some("secret".into()));
        }

        assert_eq!(store.decrypt(session, &id), None);
    }

    #[test]
    fn test_secrets_for_returns_records() {
        let store = store();
        let session = store.create_session();
        store.encrypt(session, "s1", "github", "pat").unwrap();
        store.encrypt(session, "s2", "aws", "key").unwrap();

        let records = store.secrets_for(session);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.session == session));
    }
}
