//! Account and action names.
//!
//! A [`Name`] packs up to 13 characters of the alphabet `.12345a-z` into a
//! `u64`: twelve 5-bit symbols from the most significant end, then one
//! 4-bit symbol in the low nibble. The 13th character is therefore limited
//! to `.12345a-j`.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::codec::{CodecError, Pack, Unpack};

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Maximum rendered length of a name.
pub const MAX_NAME_LENGTH: usize = 13;

/// Errors parsing a name from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name `{0}` is longer than 13 characters")]
    TooLong(String),

    #[error("name `{name}` contains invalid character `{ch}`")]
    InvalidCharacter { name: String, ch: char },

    #[error("13th character of `{0}` must be one of `.12345abcdefghij`")]
    InvalidThirteenth(String),

    #[error("name `{0}` is not in canonical form")]
    NotCanonical(String),
}

/// A 64-bit base32 name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name(pub u64);

const fn char_to_symbol(c: u8) -> u64 {
    match c {
        b'a'..=b'z' => (c - b'a') as u64 + 6,
        b'1'..=b'5' => (c - b'1') as u64 + 1,
        _ => 0,
    }
}

/// Lenient encoder: unknown characters map to `.` and anything past the
/// 13th character is ignored.
///
/// ```
/// use eos_ledger::chain::name::string_to_name;
///
/// assert_eq!(string_to_name("eosio"), 6138663577826885632);
/// ```
pub const fn string_to_name(s: &str) -> u64 {
    let bytes = s.as_bytes();
    let mut value = 0u64;
    let mut i = 0;
    while i < bytes.len() && i < 12 {
        value |= (char_to_symbol(bytes[i]) & 0x1f) << (64 - 5 * (i + 1));
        i += 1;
    }
    if bytes.len() > 12 {
        value |= char_to_symbol(bytes[12]) & 0x0f;
    }
    value
}

/// Render a name value, trimming trailing dots.
pub fn name_to_string(value: u64) -> String {
    let mut out = [b'.'; MAX_NAME_LENGTH];
    let mut tmp = value;
    for i in 0..MAX_NAME_LENGTH {
        let mask = if i == 0 { 0x0f } else { 0x1f };
        out[12 - i] = CHARMAP[(tmp & mask) as usize];
        tmp >>= if i == 0 { 4 } else { 5 };
    }
    let end = out
        .iter()
        .rposition(|&c| c != b'.')
        .map_or(0, |pos| pos + 1);
    out[..end].iter().map(|&c| c as char).collect()
}

impl Name {
    /// Compile-time constructor for literal names.
    pub const fn new(s: &str) -> Self {
        Name(string_to_name(s))
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Name {
    type Err = NameError;

    /// Strict parse: rejects anything the lenient encoder would silently
    /// rewrite.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_NAME_LENGTH {
            return Err(NameError::TooLong(s.to_string()));
        }
        for ch in s.chars() {
            if !matches!(ch, '.' | '1'..='5' | 'a'..='z') {
                return Err(NameError::InvalidCharacter {
                    name: s.to_string(),
                    ch,
                });
            }
        }
        if s.len() == MAX_NAME_LENGTH && !matches!(s.as_bytes()[12], b'.' | b'1'..=b'5' | b'a'..=b'j') {
            return Err(NameError::InvalidThirteenth(s.to_string()));
        }
        let name = Name(string_to_name(s));
        if name.to_string() != s.trim_end_matches('.') {
            return Err(NameError::NotCanonical(s.to_string()));
        }
        Ok(name)
    }
}

impl From<u64> for Name {
    fn from(value: u64) -> Self {
        Name(value)
    }
}

impl From<Name> for u64 {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&name_to_string(self.0))
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", name_to_string(self.0))
    }
}

impl Pack for Name {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.0.pack(out);
    }
}

impl Unpack for Name {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        u64::unpack(buf).map(Name)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_u64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(D::Error::custom)
        } else {
            u64::deserialize(deserializer).map(Name)
        }
    }
}
