//! Secrets detection, redaction and restoration.
//!
//! This engine keeps literal credentials out of upstream traffic and
//! restores them transparently on the way back to the user:
//!
//! - **Signatures**: named `(service, credential-type)` regexes loaded from a
//!   declarative TOML rule set, plus a built-in GitHub set
//! - **Scanner**: line-oriented matching with boundary widening
//! - **Session store**: per-request ChaCha20-Poly1305 keys with bounded
//!   lifetime; decryption fails closed
//! - **Redactor**: reversible `REDACTED<$<opaque-id>>` markers, restored on
//!   egress through the originating session only
//!
//! # Example
//!
//! ```ignore
//! use modelgate::secrets::{SecretsRedactor, SessionStore, SignatureSet};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let redactor = SecretsRedactor::new(
//!     Arc::new(SignatureSet::builtin()),
//!     Arc::new(SessionStore::new(Duration::from_secs(300))),
//! );
//!
//! let session = redactor.store().create_session();
//! let outcome = redactor.redact(session, "token ghp_....")?;
//! let restored = redactor.restore(session, &outcome.text);
//! ```

mod error;
mod redact;
mod scanner;
mod session;
mod signatures;

pub use error::SecretsError;
pub use redact::{incomplete_marker_start, RedactionOutcome, SecretsRedactor, MARKER_PREFIX};
pub use scanner::{scan, SecretMatch};
pub use session::{EncryptedSecret, SessionGuard, SessionStore};
pub use signatures::{CompiledSignature, SignatureSet};
