//! Cryptographic primitives.
//!
//! This module provides the pre-shared key type and the authenticated token
//! codec that seals every payload sent over the data channel.

pub mod codec;

pub use codec::*;
