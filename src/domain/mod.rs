//! Domain types for Veil.
//!
//! This module contains the error taxonomy shared by every layer of the crate.
//!
//! # Error Handling
//!
//! All fallible library operations return [`Result<T>`], an alias over
//! [`VeilError`]:
//!
//! ```rust
//! use veil::domain::{Result, VeilError};
//!
//! fn parse_range(days: i64) -> Result<i64> {
//!     if days < 0 {
//!         return Err(VeilError::Configuration("dateShiftRange must be >= 0".into()));
//!     }
//!     Ok(days)
//! }
//! ```
//!
//! Each variant maps onto a process exit code through
//! [`VeilError::exit_code`], which the CLI uses directly.

pub mod errors;
pub mod result;

pub use errors::VeilError;
pub use result::Result;
