//! # huddle-shared
//!
//! Types shared by every huddle crate: the realtime wire protocol, identifier
//! newtypes, the end-to-end encryption envelope and the countdown helpers
//! that drive edit/delete badges and typing indicators.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod timing;
pub mod types;

pub use error::{CryptoError, HuddleError, ValidationError};
