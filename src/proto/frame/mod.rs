//! RESP frame types.
//!
//! This module defines the reply values a cluster node can send back:
//! simple strings, errors, integers, bulk strings, arrays and nil.

/// Frame type definitions.
pub mod types;

pub use types::Frame;
