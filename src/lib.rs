//! # mgf-core — job orchestration and caching substrate
//!
//! The job orchestration and deterministic caching substrate for a
//! FreeCAD-based CAD/CAM processing platform. Three subsystems compose the
//! core:
//!
//! - [`cache`]: two-tier content-addressed Deterministic Cache Engine with
//!   single-flight computation and tag-based invalidation.
//! - [`worker`] + [`document`]: subprocess-isolated Worker Execution Engine
//!   with per-tenant resource tiers, circuit breakers, and document lifecycle.
//! - [`canonical`] + [`upload`]: Input Normalization & Validation Pipeline —
//!   deterministic canonicalization of structured params and CAD scripts,
//!   plus upload format normalization.
//!
//! [`batch`] and [`scheduler`] build on top of these; [`storage`] and
//! [`queue`] are the external-interface seams (§6), [`config`] and
//! [`fingerprint`] the ambient process-wide state, [`error`] the crate-wide
//! error aggregation.

#![warn(clippy::all)]

pub mod batch;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod queue;
pub mod rules;
pub mod scheduler;
pub mod storage;
pub mod upload;
pub mod worker;

pub use error::{CoreError, ErrorKind, ErrorResponse};
pub use fingerprint::EngineFingerprint;

/// Crate version, exposed for inclusion in the engine fingerprint (§4.1).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
