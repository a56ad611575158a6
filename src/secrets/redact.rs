//! Reversible credential redaction.
//!
//! Matches are replaced back-to-front (so earlier offsets stay valid) with
//! the marker `REDACTED<$<opaque-id>>`, byte-for-byte. The opaque id comes
//! from the per-session store; restoration resolves ids through the same
//! store and leaves any unresolvable marker untouched.

use super::error::SecretsError;
use super::scanner::{self, SecretMatch};
use super::session::SessionStore;
use super::signatures::SignatureSet;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::trace;
use uuid::Uuid;

/// Leading bytes of every redaction marker.
pub const MARKER_PREFIX: &str = "REDACTED<$";

static MARKER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Marker matcher. Also accepts the bare `<$id>` token form so a marker whose
/// `REDACTED` prefix was mangled upstream still restores.
fn marker_regex() -> &'static Regex {
    MARKER_REGEX.get_or_init(|| Regex::new(r"(?:REDACTED)?<\$([A-Za-z0-9_-]+)>").unwrap())
}

/// Result of redacting one text.
#[derive(Debug)]
pub struct RedactionOutcome {
    /// The text with every credential replaced by a marker.
    pub text: String,
    /// The credentials that were replaced, in document order.
    pub matches: Vec<SecretMatch>,
}

/// Pattern-matches credentials, swaps them for reversible markers and
/// restores them on egress.
pub struct SecretsRedactor {
    signatures: Arc<SignatureSet>,
    store: Arc<SessionStore>,
}

impl SecretsRedactor {
    /// Create a redactor over a signature set and session store.
    pub fn new(signatures: Arc<SignatureSet>, store: Arc<SessionStore>) -> Self {
        Self { signatures, store }
    }

    /// The session store backing this redactor.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Replace every credential in `text` with a session-bound marker.
    ///
    /// # Errors
    ///
    /// Fails only if the session is unknown/expired or encryption fails; a
    /// text without credentials is returned unchanged.
    pub fn redact(&self, session: Uuid, text: &str) -> Result<RedactionOutcome, SecretsError> {
        let hits = scanner::scan_ranges(text, &self.signatures);
        if hits.is_empty() {
            return Ok(RedactionOutcome {
                text: text.to_string(),
                matches: Vec::new(),
            });
        }

        let mut out = text.to_string();
        // Back to front: replacements never shift the offsets of earlier
        // matches.
        for (m, range) in hits.iter().rev() {
            let opaque_id = self.store.encrypt(session, &m.value, &m.service, &m.kind)?;
            out.replace_range(range.clone(), &format!("{MARKER_PREFIX}{opaque_id}>"));
        }

        trace!("Redacted {} credential(s)", hits.len());

        Ok(RedactionOutcome {
            text: out,
            matches: hits.into_iter().map(|(m, _)| m).collect(),
        })
    }

    /// Substitute every resolvable marker in `text` with its plaintext.
    ///
    /// Markers that do not resolve (wrong session, expired key, tampered id)
    /// are left exactly as they are; this function never fails.
    pub fn restore(&self, session: Uuid, text: &str) -> String {
        marker_regex()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                match self.store.decrypt(session, &caps[1]) {
                    Some(plaintext) => plaintext,
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Where a trailing, still-incomplete marker begins, if any.
///
/// Used by the streaming restoration step: everything from the returned index
/// on must be held back until more data arrives (or end-of-stream forces a
/// flush), because the marker may complete in the next chunk.
pub fn incomplete_marker_start(text: &str) -> Option<usize> {
    // An opened marker that never closed.
    if let Some(i) = text.rfind(MARKER_PREFIX) {
        let tail = &text[i + MARKER_PREFIX.len()..];
        if !tail.contains('>')
            && tail
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Some(i);
        }
    }

    // A partial prefix at the very end ("RED", "REDACTED<", ...).
    for len in (1..MARKER_PREFIX.len()).rev() {
        if text.ends_with(&MARKER_PREFIX[..len]) {
            return Some(text.len() - len);
        }
    }

    None
}
