//! Opaque identifier codec.
//!
//! Internal integer ids are never exposed directly. Each entity kind gets its
//! own salted [`OpaqueCodec`]; tokens are reversible, collision-free within a
//! codec, and decoding is total: malformed or non-canonical input yields
//! `None`, never id zero.

use crate::ids::{JobId, OrderId, ProductId};

const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

/// Number of alphabet characters reserved for left padding.
const GUARD_COUNT: usize = 4;

/// Default minimum token length.
pub const DEFAULT_MIN_LENGTH: usize = 8;

/// A reversible integer ↔ token mapping keyed by a salt.
#[derive(Debug, Clone)]
pub struct OpaqueCodec {
    salt: Vec<char>,
    alphabet: Vec<char>,
    guards: Vec<char>,
    min_length: usize,
}

impl OpaqueCodec {
    /// Build a codec for the given salt.
    #[must_use]
    pub fn new(salt: &str, min_length: usize) -> Self {
        let salt: Vec<char> = salt.chars().collect();
        let mut chars: Vec<char> = DEFAULT_ALPHABET.chars().collect();
        consistent_shuffle(&mut chars, &salt);
        let alphabet = chars.split_off(GUARD_COUNT);

        Self {
            salt,
            alphabet,
            guards: chars,
            min_length,
        }
    }

    /// Encode an integer into a token.
    #[must_use]
    pub fn encode(&self, value: u64) -> String {
        let len = self.alphabet.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let lottery = self.alphabet[(value % len) as usize];

        let mut body = Vec::new();
        let working = self.working_alphabet(lottery);
        let mut rest = value;
        loop {
            #[allow(clippy::cast_possible_truncation)]
            body.push(working[(rest % len) as usize]);
            rest /= len;
            if rest == 0 {
                break;
            }
        }
        body.reverse();

        let core_len = body.len() + 1;
        let mut token = String::with_capacity(self.min_length.max(core_len));
        let padding = self.min_length.saturating_sub(core_len);
        for i in 0..padding {
            #[allow(clippy::cast_possible_truncation)]
            let idx = ((value + i as u64) % self.guards.len() as u64) as usize;
            token.push(self.guards[idx]);
        }
        token.push(lottery);
        token.extend(body);
        token
    }

    /// Decode a token back into an integer.
    ///
    /// Returns `None` for anything that `encode` would not have produced.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<u64> {
        let core = token.trim_start_matches(|c| self.guards.contains(&c));
        let mut chars = core.chars();
        let lottery = chars.next()?;
        if !self.alphabet.contains(&lottery) {
            return None;
        }

        let working = self.working_alphabet(lottery);
        let len = working.len() as u64;
        let mut value: u64 = 0;
        let mut digits = 0usize;
        for c in chars {
            let digit = working.iter().position(|w| *w == c)? as u64;
            value = value.checked_mul(len)?.checked_add(digit)?;
            digits += 1;
        }
        if digits == 0 {
            return None;
        }

        (self.encode(value) == token).then_some(value)
    }

    fn working_alphabet(&self, lottery: char) -> Vec<char> {
        let mut key = Vec::with_capacity(self.salt.len() + 1);
        key.push(lottery);
        key.extend_from_slice(&self.salt);
        let mut working = self.alphabet.clone();
        consistent_shuffle(&mut working, &key);
        working
    }
}

/// Deterministic salt-driven permutation of `alphabet`.
fn consistent_shuffle(alphabet: &mut [char], salt: &[char]) {
    if salt.is_empty() || alphabet.len() < 2 {
        return;
    }

    let mut v = 0usize;
    let mut p = 0usize;
    for i in (1..alphabet.len()).rev() {
        v %= salt.len();
        let integer = salt[v] as usize;
        p += integer;
        let j = (integer + v + p) % i;
        alphabet.swap(i, j);
        v += 1;
    }
}

/// The set of codecs used for externally visible identifiers.
#[derive(Debug, Clone)]
pub struct IdCodecs {
    jobs: OpaqueCodec,
    orders: OpaqueCodec,
    products: OpaqueCodec,
}

impl IdCodecs {
    /// Build codecs for every entity kind from a shared secret salt.
    #[must_use]
    pub fn new(salt: &str) -> Self {
        Self {
            jobs: OpaqueCodec::new(&format!("{salt}:flux"), DEFAULT_MIN_LENGTH),
            orders: OpaqueCodec::new(&format!("{salt}:charge-order"), DEFAULT_MIN_LENGTH),
            products: OpaqueCodec::new(&format!("{salt}:charge-product"), DEFAULT_MIN_LENGTH),
        }
    }

    /// Encode a generation job id.
    #[must_use]
    pub fn encode_job(&self, id: JobId) -> String {
        self.jobs.encode(id.get().unsigned_abs())
    }

    /// Decode a generation job token.
    #[must_use]
    pub fn decode_job(&self, token: &str) -> Option<JobId> {
        decode_positive(&self.jobs, token).map(JobId::new)
    }

    /// Encode a charge order id.
    #[must_use]
    pub fn encode_order(&self, id: OrderId) -> String {
        self.orders.encode(id.get().unsigned_abs())
    }

    /// Decode a charge order token.
    #[must_use]
    pub fn decode_order(&self, token: &str) -> Option<OrderId> {
        decode_positive(&self.orders, token).map(OrderId::new)
    }

    /// Encode a charge product id.
    #[must_use]
    pub fn encode_product(&self, id: ProductId) -> String {
        self.products.encode(id.get().unsigned_abs())
    }

    /// Decode a charge product token.
    #[must_use]
    pub fn decode_product(&self, token: &str) -> Option<ProductId> {
        decode_positive(&self.products, token).map(ProductId::new)
    }
}

fn decode_positive(codec: &OpaqueCodec, token: &str) -> Option<i64> {
    codec
        .decode(token)
        .and_then(|v| i64::try_from(v).ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn encode_then_decode_recovers_value() {
        let codec = OpaqueCodec::new("test-salt", DEFAULT_MIN_LENGTH);
        for value in [0, 1, 2, 61, 62, 1_000, 987_654_321, u64::MAX] {
            let token = codec.encode(value);
            assert!(token.len() >= DEFAULT_MIN_LENGTH, "{token} too short");
            assert_eq!(codec.decode(&token), Some(value), "token {token}");
        }
    }

    #[test]
    fn tokens_are_unique() {
        let codec = OpaqueCodec::new("unique", DEFAULT_MIN_LENGTH);
        let tokens: HashSet<String> = (1..5_000).map(|v| codec.encode(v)).collect();
        assert_eq!(tokens.len(), 4_999);
    }

    #[test]
    fn malformed_tokens_decode_to_none() {
        let codec = OpaqueCodec::new("strict", DEFAULT_MIN_LENGTH);
        assert_eq!(codec.decode(""), None);
        assert_eq!(codec.decode("!!!!"), None);
        assert_eq!(codec.decode("not a token"), None);

        let mut token = codec.encode(12_345);
        token.push('Z');
        token.push('Z');
        assert_ne!(codec.decode(&token), Some(12_345));
    }

    #[test]
    fn salts_separate_entity_kinds() {
        let codecs = IdCodecs::new("app");
        let order_token = codecs.encode_order(OrderId::new(5));
        assert_eq!(codecs.decode_order(&order_token), Some(OrderId::new(5)));
        assert_ne!(codecs.encode_product(ProductId::new(5)), order_token);
        assert_ne!(codecs.decode_product(&order_token), Some(ProductId::new(5)));
    }

    #[test]
    fn zero_is_never_a_decoded_id() {
        let codecs = IdCodecs::new("app");
        let zero = codecs.jobs.encode(0);
        assert_eq!(codecs.decode_job(&zero), None);
        assert_eq!(codecs.decode_job("garbage"), None);
    }
}
