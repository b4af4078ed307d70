//! # Proto
//!
//! RESP2 wire protocol: frame types, encoder, decoder and the crate-wide
//! error type.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and decoder for the RESP protocol
//! - [`error`] - Error types shared by every layer
//! - [`frame`] - Frame types representing RESP replies

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
