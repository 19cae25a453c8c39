//! Shared building blocks for the Ibtikar services
//!
//! - `Secret` keeps plaintext credentials out of logs and zeroes them on drop.
//! - `SecretCodec` encrypts credential fields before they reach storage.
//! - `Error` covers configuration loading shared by every binary.

pub mod codec;
mod error;
mod secret;

pub use codec::{CodecError, SecretCodec};
pub use error::{Error, Result};
pub use secret::Secret;
