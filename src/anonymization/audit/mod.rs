//! Audit logging module
//!
//! Provides structured audit logging for anonymization operations. Entries
//! carry operation counts and a hash of the item locator, never values.

pub mod logger;

pub use logger::AuditLogger;
