// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An order-preserving, self-describing tuple encoding (§3 "Key tuple encoding"): byte-order
//! comparison of two encoded tuples matches element-wise comparison of the original tuples, so
//! the KV store's native range scans work directly over these keys.
//!
//! Elements are tagged (`Int`, `Bytes`, `Str`) the way a `foundationdb`-style directory layer
//! tags tuple elements, but hand-rolled here with `byteorder` (as the teacher hand-rolls its own
//! block/trailer binary formats) rather than pulling in the full tuple layer.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;

const TAG_INT: u8 = 0x01;
const TAG_BYTES: u8 = 0x02;
const TAG_STR: u8 = 0x03;

/// A single order-preserving tuple element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Element {
    /// A signed 64-bit integer, bias-shifted so unsigned big-endian comparison matches signed
    /// comparison.
    Int(i64),
    Bytes(Vec<u8>),
    Str(String),
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Element {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<i32> for Element {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Vec<u8>> for Element {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for Element {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

/// A tuple of [`Element`]s that packs into an order-preserving byte string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tuple(Vec<Element>);

impl Tuple {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn push(mut self, element: impl Into<Element>) -> Self {
        self.0.push(element.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Packs the tuple into an order-preserving byte string.
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for element in &self.0 {
            pack_element(element, &mut out);
        }
        out
    }

    /// Packs this tuple as a prefix followed by `suffix`'s own packed bytes, i.e. concatenation of
    /// subspace and key — the common case for building a key under a logical subspace.
    #[must_use]
    pub fn child(&self, suffix: impl Into<Element>) -> Self {
        self.clone().push(suffix)
    }

    /// Returns the half-open `[begin, end)` byte range that contains every key that has this
    /// tuple as a strict prefix (used for `clear_range`/`get_range` over an entire subspace).
    #[must_use]
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let begin = self.pack();
        let mut end = begin.clone();
        end.push(0xFF);
        (begin, end)
    }

    /// Returns the first element if it is an [`Element::Int`] — used by callers that only need to
    /// decode a single packed timestamp back out of a key suffix.
    #[must_use]
    pub fn first_int(&self) -> Option<i64> {
        match self.0.first() {
            Some(Element::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Unpacks a byte string produced by [`Tuple::pack`].
    pub fn unpack(mut bytes: &[u8]) -> crate::Result<Self> {
        let mut elements = Vec::new();
        while !bytes.is_empty() {
            let (element, rest) = unpack_element(bytes)?;
            elements.push(element);
            bytes = rest;
        }
        Ok(Self(elements))
    }
}

fn pack_element(element: &Element, out: &mut Vec<u8>) {
    match element {
        Element::Int(value) => {
            out.write_u8(TAG_INT).expect("vec write cannot fail");
            let biased = (*value as u64) ^ (1u64 << 63);
            out.write_u64::<BigEndian>(biased)
                .expect("vec write cannot fail");
        }
        Element::Bytes(bytes) => {
            out.write_u8(TAG_BYTES).expect("vec write cannot fail");
            write_escaped(bytes, out);
        }
        Element::Str(s) => {
            out.write_u8(TAG_STR).expect("vec write cannot fail");
            write_escaped(s.as_bytes(), out);
        }
    }
}

/// Escapes `0x00` as `0x00 0xFF` and terminates with `0x00 0x00`, the classic order-preserving
/// nul-escaping scheme used by tuple layers so embedded zero bytes don't corrupt prefix ordering.
fn write_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xFF);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

fn read_escaped(bytes: &[u8]) -> crate::Result<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        match bytes.get(i) {
            None => return Err(crate::Error::InvalidTag("tuple-escape", 0)),
            Some(0x00) => match bytes.get(i + 1) {
                Some(0x00) => return Ok((out, &bytes[i + 2..])),
                Some(0xFF) => {
                    out.push(0x00);
                    i += 2;
                }
                _ => return Err(crate::Error::InvalidTag("tuple-escape", 1)),
            },
            Some(&b) => {
                out.push(b);
                i += 1;
            }
        }
    }
}

fn unpack_element(bytes: &[u8]) -> crate::Result<(Element, &[u8])> {
    let (&tag, rest) = bytes
        .split_first()
        .ok_or(crate::Error::InvalidTag("tuple-tag", 0))?;

    match tag {
        TAG_INT => {
            if rest.len() < 8 {
                return Err(crate::Error::Eof);
            }
            let mut reader = &rest[..8];
            let biased = reader.read_u64::<BigEndian>()?;
            let value = (biased ^ (1u64 << 63)) as i64;
            Ok((Element::Int(value), &rest[8..]))
        }
        TAG_BYTES => {
            let (bytes, rest) = read_escaped(rest)?;
            Ok((Element::Bytes(bytes), rest))
        }
        TAG_STR => {
            let (bytes, rest) = read_escaped(rest)?;
            let s = String::from_utf8(bytes).map_err(|_| crate::Error::InvalidTag("tuple-str", 3))?;
            Ok((Element::Str(s), rest))
        }
        other => Err(crate::Error::InvalidTag("tuple-tag", u32::from(other))),
    }
}

/// Compares two packed tuples by their encoded bytes; by construction this matches element-wise
/// tuple comparison.
#[must_use]
pub fn compare_packed(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_mixed_tuple() {
        let tuple = Tuple::new()
            .push(Element::from("idx"))
            .push(Element::from(vec![1u8, 2, 3]))
            .push(Element::from(-42i64))
            .push(Element::from(7i64));

        let packed = tuple.pack();
        let unpacked = Tuple::unpack(&packed).unwrap();
        assert_eq!(tuple, unpacked);
    }

    #[test]
    fn int_ordering_is_preserved() {
        let values = [-100i64, -1, 0, 1, 100, i64::MIN, i64::MAX];
        for &a in &values {
            for &b in &values {
                let pa = Tuple::new().push(Element::from(a)).pack();
                let pb = Tuple::new().push(Element::from(b)).pack();
                assert_eq!(a.cmp(&b), pa.cmp(&pb), "mismatch for {a} vs {b}");
            }
        }
    }

    #[test]
    fn bytes_ordering_is_preserved() {
        let values: &[&[u8]] = &[b"", b"a", b"ab", b"ac", b"b", &[0, 1], &[0, 0, 1]];
        for &a in values {
            for &b in values {
                let pa = Tuple::new().push(Element::from(a)).pack();
                let pb = Tuple::new().push(Element::from(b)).pack();
                assert_eq!(a.cmp(b), pa.cmp(&pb), "mismatch for {a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn prefix_tuple_orders_before_longer_tuple_with_same_prefix() {
        let parent = Tuple::new().push(Element::from("g"));
        let child = parent.clone().push(Element::from(1i64));
        assert_eq!(parent.pack().cmp(&child.pack()), Ordering::Less);
    }

    #[test]
    fn range_contains_all_children() {
        let parent = Tuple::new().push(Element::from("g"));
        let (begin, end) = parent.range();

        for i in -5i64..5 {
            let child = parent.child(Element::from(i)).pack();
            assert!(child.as_slice() >= begin.as_slice());
            assert!(child.as_slice() < end.as_slice());
        }
    }
}
