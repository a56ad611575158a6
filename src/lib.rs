//! modelgate: security gateway for LLM traffic
//!
//! This crate sits between developer tools (IDE assistants, CLI copilots)
//! and upstream LLM providers. It intercepts traffic, inspects and mutates
//! it to prevent secret/PII leakage, and routes each request to a configured
//! backend model.
//!
//! # Security Model
//!
//! Confidentiality is **fail-closed**: a credential that cannot be restored
//! stays redacted, a session whose key expired never decrypts, and the
//! persisted copy of a request never contains plaintext secrets.
//!
//! # Architecture
//!
//! - **CA**: persistent root of trust issuing per-domain leaf certificates
//! - **Proxy**: TLS-intercepting forward proxy with CONNECT upgrade
//! - **Pipeline**: staged inspection over requests and response streams
//! - **Secrets**: session-scoped reversible credential/PII redaction
//! - **Mux**: priority-ordered routing of requests to provider+model pairs
//! - **Config**: hierarchical TOML configuration
//! - **Telemetry**: structured syslog audit trail

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod ca;
pub mod cli;
pub mod collab;
pub mod config;
pub mod mux;
pub mod pipeline;
pub mod proxy;
pub mod secrets;
pub mod telemetry;
