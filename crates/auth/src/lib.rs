#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # CORTEX Auth
//!
//! API-key authentication (hashed-at-rest, constant-time posture), the
//! role/permission RBAC engine, the sovereign gate that additionally
//! requires a consensus-backed claim, and the sliding-window rate limiter.

/// The storage backend contract and its SQLite implementation.
pub mod backend;
/// The sovereign gate.
pub mod gate;
/// The API-key manager.
pub mod manager;
/// The sliding-window rate limiter.
pub mod rate;
/// Role and permission evaluation.
pub mod rbac;

pub use backend::{AuthBackend, SqliteAuthBackend};
pub use gate::SovereignGate;
pub use manager::AuthManager;
pub use rate::RateLimiter;
pub use rbac::RbacEvaluator;
