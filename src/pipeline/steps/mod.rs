//! Built-in pipeline steps.
//!
//! Input steps: secrets redaction, PII redaction, context injection, local
//! command interception. Output steps: marker restoration and the redaction
//! notification appended at end of stream.

mod command;
mod context_injection;
mod notify;
mod pii;
mod restore;
mod secrets_redact;

pub use command::CommandInterceptionStep;
pub use context_injection::ContextInjectionStep;
pub use notify::NotificationStep;
pub use pii::{PiiAnalyzer, PiiMatch, PiiRedactionStep};
pub use restore::RestorationStep;
pub use secrets_redact::SecretsRedactionStep;
