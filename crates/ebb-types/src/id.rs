use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Crockford base-32 alphabet (no I, L, O, U).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Rendered identifier length: 26 characters of 5 bits each.
pub const ENCODED_LEN: usize = 26;

/// Mask selecting the 48-bit millisecond timestamp component.
const TIMESTAMP_MASK: u64 = (1 << 48) - 1;

/// Globally unique, lexicographically sortable mutation identifier.
///
/// A 128-bit value: the 48 most significant bits are a millisecond Unix
/// timestamp, the remaining 80 bits are random entropy. Rendered as a
/// fixed 26-character Crockford base-32 string whose lexicographic order
/// matches numeric order, so identifiers generated at different
/// milliseconds sort chronologically. Identifiers generated within the
/// same millisecond are ordered by their entropy and are not monotonic.
///
/// Parsing is case-insensitive; [`fmt::Display`] renders the canonical
/// uppercase form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(u128);

impl EventId {
    /// Generate a fresh identifier from the current wall clock and new
    /// entropy. Never blocks.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
            & TIMESTAMP_MASK;

        let entropy: [u8; 10] = rand::thread_rng().gen();
        let mut entropy_bits: u128 = 0;
        for byte in entropy {
            entropy_bits = (entropy_bits << 8) | byte as u128;
        }
        Self((millis as u128) << 80 | entropy_bits)
    }

    /// Generate `n` identifiers, returned sorted ascending.
    ///
    /// Entries are mutually distinct with overwhelming probability. The
    /// sort is required because same-millisecond identifiers are ordered
    /// by entropy, not generation order.
    pub fn generate_batch(n: usize) -> Vec<Self> {
        let mut ids: Vec<Self> = (0..n).map(|_| Self::generate()).collect();
        ids.sort();
        ids
    }

    /// Check whether `s` is a well-formed identifier: exactly 26
    /// characters from the base-32 alphabet, either case.
    pub fn is_valid(s: &str) -> bool {
        s.len() == ENCODED_LEN && s.bytes().all(|b| decode_digit(b).is_some())
    }

    /// Case-insensitive lexicographic comparison of two raw identifier
    /// strings.
    pub fn compare(a: &str, b: &str) -> Ordering {
        a.bytes()
            .map(|b| b.to_ascii_uppercase())
            .cmp(b.bytes().map(|b| b.to_ascii_uppercase()))
    }

    /// Decode the leading 48-bit millisecond timestamp of `s`.
    pub fn extract_timestamp(s: &str) -> Result<u64, IdError> {
        s.parse::<Self>().map(|id| id.timestamp_ms())
    }

    /// The millisecond Unix timestamp embedded in this identifier.
    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> 80) as u64
    }

    /// First 8 characters of the canonical rendering, for logs.
    pub fn short_id(&self) -> String {
        self.to_string()[..8].to_string()
    }

    /// The raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// Construct from a raw 128-bit value. Intended for tests and
    /// deterministic fixtures.
    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }
}

/// Map one base-32 character to its 5-bit value, case-insensitive.
fn decode_digit(b: u8) -> Option<u8> {
    ALPHABET
        .iter()
        .position(|&a| a == b.to_ascii_uppercase())
        .map(|p| p as u8)
}

impl FromStr for EventId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(IdError::InvalidIdentifier(s.to_string()));
        }
        let mut value: u128 = 0;
        for b in s.bytes() {
            let digit = decode_digit(b).ok_or_else(|| IdError::InvalidIdentifier(s.to_string()))?;
            // 26 digits carry 130 bits; the 2 excess high bits fall off
            // the left edge, so any digit string maps onto u128.
            value = (value << 5) | digit as u128;
        }
        Ok(Self(value))
    }
}

impl TryFrom<String> for EventId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [0u8; ENCODED_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let shift = 5 * (ENCODED_LEN - 1 - i);
            *slot = ALPHABET[((self.0 >> shift) & 0x1F) as usize];
        }
        // The alphabet is ASCII, so this cannot fail.
        f.write_str(std::str::from_utf8(&out).expect("base-32 output is ASCII"))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.short_id())
    }
}
