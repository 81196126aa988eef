//! Destination normalization and chat addressing.

use crate::error::{Error, Result};

const CHAT_SUFFIX: &str = "@c.us";

/// Strip everything but ASCII digits from a phone number.
pub fn normalize(destination: &str) -> Result<String> {
    let digits: String = destination.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(Error::destination_invalid(destination));
    }
    Ok(digits)
}

/// Chat id for a destination, e.g. `15551234567@c.us`.
pub fn chat_id(destination: &str) -> Result<String> {
    normalize(destination).map(|digits| format!("{digits}{CHAT_SUFFIX}"))
}
