//! Canonical binary wire encoding.
//!
//! The layout is the one every EOS-family node agrees on:
//!
//! | Shape            | Encoding                                       |
//! |------------------|------------------------------------------------|
//! | fixed integers   | little-endian, natural width                   |
//! | `VarUint32`      | LEB128, at most 5 bytes                        |
//! | `Vec<T>` / bytes | `VarUint32` length, then each element          |
//! | `String`         | `VarUint32` length, then UTF-8 bytes           |
//! | `Option<T>`      | one byte (0 or 1), then the value if present   |
//! | `[u8; N]`        | raw bytes, no prefix                           |
//! | `BTreeMap<K, V>` | `VarUint32` length, then sorted `(K, V)` pairs |
//!
//! Hashes are computed over these bytes, so field order inside every
//! `Pack` impl is consensus-critical.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("varuint32 does not fit in 32 bits")]
    VarUintOverflow,

    #[error("declared length {len} exceeds remaining input {remaining}")]
    LengthOverflow { len: usize, remaining: usize },

    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u64 },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Serialize a value into its canonical wire form.
pub trait Pack {
    fn pack<B: BufMut>(&self, out: &mut B);

    /// Pack into a fresh buffer.
    fn packed(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.pack(&mut out);
        out
    }

    /// Length of the packed form.
    fn packed_size(&self) -> usize {
        self.packed().len()
    }
}

/// Deserialize a value from its canonical wire form.
pub trait Unpack: Sized {
    /// Read one value from the front of `buf`, advancing it.
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError>;

    /// Read one value that must consume `bytes` entirely.
    fn unpack_exact(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut buf = bytes;
        let value = Self::unpack(&mut buf)?;
        if !buf.is_empty() {
            return Err(CodecError::TrailingBytes(buf.len()));
        }
        Ok(value)
    }
}

pub(crate) fn ensure(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::UnexpectedEof {
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// VarUint32
// ---------------------------------------------------------------------------

/// An unsigned 32-bit integer encoded as LEB128.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VarUint32(pub u32);

impl From<u32> for VarUint32 {
    fn from(v: u32) -> Self {
        VarUint32(v)
    }
}

impl Pack for VarUint32 {
    fn pack<B: BufMut>(&self, out: &mut B) {
        let mut v = self.0;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.put_u8(byte);
            if v == 0 {
                break;
            }
        }
    }
}

impl Unpack for VarUint32 {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            ensure(buf, 1)?;
            let byte = buf.get_u8();
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return Err(CodecError::VarUintOverflow);
            }
        }
        u32::try_from(value)
            .map(VarUint32)
            .map_err(|_| CodecError::VarUintOverflow)
    }
}

fn pack_len<B: BufMut>(len: usize, out: &mut B) {
    VarUint32(len as u32).pack(out);
}

fn unpack_len(buf: &mut &[u8]) -> Result<usize, CodecError> {
    let len = VarUint32::unpack(buf)?.0 as usize;
    if len > buf.len() {
        return Err(CodecError::LengthOverflow {
            len,
            remaining: buf.len(),
        });
    }
    Ok(len)
}

// ---------------------------------------------------------------------------
// Primitive impls
// ---------------------------------------------------------------------------

macro_rules! impl_fixed {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl Pack for $ty {
            fn pack<B: BufMut>(&self, out: &mut B) {
                out.$put(*self);
            }
        }

        impl Unpack for $ty {
            fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
                ensure(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

impl_fixed!(u8, 1, put_u8, get_u8);
impl_fixed!(u16, 2, put_u16_le, get_u16_le);
impl_fixed!(u32, 4, put_u32_le, get_u32_le);
impl_fixed!(u64, 8, put_u64_le, get_u64_le);
impl_fixed!(i64, 8, put_i64_le, get_i64_le);
impl_fixed!(u128, 16, put_u128_le, get_u128_le);

impl Pack for bool {
    fn pack<B: BufMut>(&self, out: &mut B) {
        out.put_u8(u8::from(*self));
    }
}

impl Unpack for bool {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        match u8::unpack(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::InvalidTag {
                what: "bool",
                tag: u64::from(tag),
            }),
        }
    }
}

impl<const N: usize> Pack for [u8; N] {
    fn pack<B: BufMut>(&self, out: &mut B) {
        out.put_slice(self);
    }
}

impl<const N: usize> Unpack for [u8; N] {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        ensure(buf, N)?;
        let mut arr = [0u8; N];
        buf.copy_to_slice(&mut arr);
        Ok(arr)
    }
}

impl Pack for str {
    fn pack<B: BufMut>(&self, out: &mut B) {
        pack_len(self.len(), out);
        out.put_slice(self.as_bytes());
    }
}

impl Pack for String {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.as_str().pack(out);
    }
}

impl Unpack for String {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let len = unpack_len(buf)?;
        let bytes = buf[..len].to_vec();
        buf.advance(len);
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

impl<T: Pack> Pack for [T] {
    fn pack<B: BufMut>(&self, out: &mut B) {
        pack_len(self.len(), out);
        for item in self {
            item.pack(out);
        }
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.as_slice().pack(out);
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let len = unpack_len(buf)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::unpack(buf)?);
        }
        Ok(items)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack<B: BufMut>(&self, out: &mut B) {
        match self {
            Some(value) => {
                out.put_u8(1);
                value.pack(out);
            }
            None => out.put_u8(0),
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        if bool::unpack(buf)? {
            Ok(Some(T::unpack(buf)?))
        } else {
            Ok(None)
        }
    }
}

impl<A: Pack, B2: Pack> Pack for (A, B2) {
    fn pack<B: BufMut>(&self, out: &mut B) {
        self.0.pack(out);
        self.1.pack(out);
    }
}

impl<A: Unpack, B2: Unpack> Unpack for (A, B2) {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        Ok((A::unpack(buf)?, B2::unpack(buf)?))
    }
}

impl<K: Pack, V: Pack> Pack for BTreeMap<K, V> {
    fn pack<B: BufMut>(&self, out: &mut B) {
        pack_len(self.len(), out);
        for (key, value) in self {
            key.pack(out);
            value.pack(out);
        }
    }
}

impl<K: Unpack + Ord, V: Unpack> Unpack for BTreeMap<K, V> {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let len = unpack_len(buf)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::unpack(buf)?;
            let value = V::unpack(buf)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl Pack for crate::crypto::hash::Digest {
    fn pack<B: BufMut>(&self, out: &mut B) {
        out.put_slice(&self.0);
    }
}

impl Unpack for crate::crypto::hash::Digest {
    fn unpack(buf: &mut &[u8]) -> Result<Self, CodecError> {
        <[u8; 32]>::unpack(buf).map(crate::crypto::hash::Digest)
    }
}
