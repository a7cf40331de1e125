//! # sfm-id
//!
//! Typed identifiers for the stream fleet manager.
//!
//! IDs are opaque strings produced by other systems. Typing them keeps a
//! cluster id from being passed where an instance id is expected, and the
//! shared validation rejects values the persistence layer would refuse.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Maximum accepted length of an ID, in bytes.
pub const MAX_ID_LEN: usize = 255;

/// Validate the shape of a raw ID string.
#[doc(hidden)]
pub fn validate(s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.len() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            len: s.len(),
            max: MAX_ID_LEN,
        });
    }
    if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::InvalidCharacter(c));
    }
    Ok(())
}
