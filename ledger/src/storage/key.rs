//! Order-preserving key encoding.
//!
//! Every index key is the concatenation of its fields, each written so that
//! comparing the raw bytes gives the same answer as comparing the values.
//! sled orders keys lexicographically, so that is all range scans need.
//!
//! | Field               | Encoding                                         |
//! |---------------------|--------------------------------------------------|
//! | unsigned ints, names| big-endian, natural width                        |
//! | signed ints         | big-endian with the sign bit flipped             |
//! | `f64`               | IEEE-754 bits mapped onto their total order      |
//! | binary128           | same mapping over 128 bits                       |
//! | 256-bit keys        | two big-endian `u128` words, high word first     |
//! | variable bytes      | `0x00` escaped as `00 ff`, terminated by `00 01` |

use crate::chain::Name;

/// Builder for composite index keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyEncoder {
    buf: Vec<u8>,
}

impl KeyEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        // Flip sign bit so negatives sort below positives.
        let biased = (v as u64) ^ (1u64 << 63);
        self.buf.extend_from_slice(&biased.to_be_bytes());
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.buf.push(u8::from(v));
        self
    }

    pub fn name(&mut self, v: Name) -> &mut Self {
        self.u64(v.value())
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.u64(f64_order_bits(v))
    }

    /// IEEE-754 binary128 given as its 16 little-endian bytes.
    pub fn binary128(&mut self, le_bytes: [u8; 16]) -> &mut Self {
        self.u128(binary128_order_bits(le_bytes))
    }

    /// 256-bit key given as two words, high word first.
    pub fn key256(&mut self, words: [u128; 2]) -> &mut Self {
        self.u128(words[0]).u128(words[1])
    }

    /// Variable-length bytes, escaped so no encoding is a prefix of another.
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        for &b in v {
            if b == 0 {
                self.buf.extend_from_slice(&[0x00, 0xff]);
            } else {
                self.buf.push(b);
            }
        }
        self.buf.extend_from_slice(&[0x00, 0x01]);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Map `f64` bits so unsigned comparison follows `f64::total_cmp`.
pub fn f64_order_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1u64 << 63)
    }
}

/// Same mapping as [`f64_order_bits`] for binary128.
pub fn binary128_order_bits(le_bytes: [u8; 16]) -> u128 {
    let bits = u128::from_le_bytes(le_bytes);
    if bits >> 127 == 1 {
        !bits
    } else {
        bits ^ (1u128 << 127)
    }
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` when no such string exists (all `0xff`).
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xff {
            out.push(last + 1);
            return Some(out);
        }
    }
    None
}
