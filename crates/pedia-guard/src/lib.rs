//! Inactivity guard and bounded audit log for Pedia.

pub mod audit;
pub mod guard;

pub use audit::{AuditAction, AuditEntry, AuditLog, DEFAULT_AUDIT_CAPACITY};
pub use guard::{
    ActivityKind, DEFAULT_GRACE_MINUTES, DEFAULT_TIMEOUT_MINUTES, GuardConfig, GuardSignal,
    SessionGuard,
};
