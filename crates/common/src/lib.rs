//! Common utilities and types shared across posturescan crates.

pub mod error;
pub mod severity;
pub mod timestamp;

pub use error::{Error, Result};
pub use severity::Severity;
pub use timestamp::Timestamp;
