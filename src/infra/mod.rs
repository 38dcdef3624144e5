//! Runtime bootstrap shared by the binary and embedding applications.

pub mod error;
pub mod telemetry;
