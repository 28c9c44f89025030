//! Monotonic lexicographic identifiers.
//!
//! Identifiers are 26-character Crockford-base32 strings (the ULID layout):
//! the first 10 characters encode milliseconds since the epoch big-endian,
//! the last 16 encode randomness. Byte-wise lexicographic order therefore
//! equals creation order, which is what makes short-prefix lookup stable:
//! a prefix that is unambiguous today stays unambiguous as newer (greater)
//! identifiers arrive.
//!
//! Within one process the generator is strictly monotonic even inside a
//! single millisecond: when the timestamp has not advanced, the previous
//! identifier's random portion is incremented by one instead of re-rolled.

use std::sync::Arc;

use parking_lot::Mutex;
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::{Result, StoreError};

/// Length of a full identifier in characters.
pub const ID_LEN: usize = 26;

/// Crockford base32 alphabet used by identifiers (no I, L, O, U).
const ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Mints monotonic identifiers from a [`Clock`].
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<Ulid>>,
}

impl IdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Mint the next identifier.
    ///
    /// Strictly greater than every identifier previously minted by this
    /// generator, regardless of how many land in the same millisecond.
    pub fn next(&self) -> String {
        let now_ms = self.clock.now_ms().max(0) as u64;
        let mut last = self.last.lock();

        let next = match *last {
            // Same (or rewound) millisecond: bump the random portion.
            Some(prev) if prev.timestamp_ms() >= now_ms => prev
                .increment()
                // Random portion exhausted within one millisecond; move to
                // the next tick rather than going backwards.
                .unwrap_or_else(|| Ulid::from_parts(prev.timestamp_ms() + 1, rand::random())),
            _ => Ulid::from_parts(now_ms, rand::random()),
        };

        *last = Some(next);
        next.to_string()
    }
}

/// Validate a user-supplied identifier or identifier prefix.
///
/// Returns the normalized (uppercased) form, or [`StoreError::InvalidMessageId`]
/// for empty input, input longer than a full identifier, or characters
/// outside the Crockford alphabet. Lowercase input is accepted; `I`/`L`/`O`/`U`
/// are not, matching what the generator can ever produce.
pub fn validate_id_prefix(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.len() > ID_LEN {
        return Err(StoreError::InvalidMessageId(input.to_string()));
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.bytes().any(|b| !ALPHABET.contains(&b)) {
        return Err(StoreError::InvalidMessageId(input.to_string()));
    }
    Ok(upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FixedClock, SystemClock};

    #[test]
    fn ids_are_26_crockford_chars() {
        let gen = IdGenerator::new(Arc::new(SystemClock));
        let id = gen.next();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn same_millisecond_ids_strictly_increase() {
        let clock = FixedClock::new(1_600_000_000_000);
        let gen = IdGenerator::new(clock);
        let mut prev = gen.next();
        for _ in 0..1_000 {
            let next = gen.next();
            assert!(next > prev, "{next} should sort after {prev}");
            prev = next;
        }
    }

    #[test]
    fn later_millisecond_sorts_after() {
        let clock = FixedClock::new(1_600_000_000_000);
        let gen = IdGenerator::new(clock.clone());
        let a = gen.next();
        clock.advance(1);
        let b = gen.next();
        assert!(b > a);
        // Timestamp prefix alone already orders them.
        assert!(b[..10] > a[..10]);
    }

    #[test]
    fn same_millisecond_shares_timestamp_prefix() {
        let clock = FixedClock::new(1_600_000_000_000);
        let gen = IdGenerator::new(clock);
        let a = gen.next();
        let b = gen.next();
        assert_eq!(a[..10], b[..10]);
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_validation() {
        assert_eq!(validate_id_prefix("01hx5ka9").unwrap(), "01HX5KA9");
        assert_eq!(validate_id_prefix(" 01HX ").unwrap(), "01HX");

        assert!(matches!(
            validate_id_prefix(""),
            Err(StoreError::InvalidMessageId(_))
        ));
        assert!(matches!(
            validate_id_prefix("not-an-id!"),
            Err(StoreError::InvalidMessageId(_))
        ));
        // I, L, O, U are outside the alphabet.
        assert!(validate_id_prefix("01ILOU").is_err());
        // 27 characters cannot prefix a 26-character identifier.
        assert!(validate_id_prefix(&"0".repeat(27)).is_err());
    }
}
