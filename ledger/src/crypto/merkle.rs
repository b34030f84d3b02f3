//! # Merkle Commitment
//!
//! Binds a block to the ordered list of its transaction receipts and its
//! action receipts. The construction is the canonical-pair tree every
//! EOS-family node computes:
//!
//! 1. Before hashing a pair, clear the top bit of the left node's first byte
//!    and set it on the right node's first byte. A parent can then never be
//!    confused with a leaf re-hashed on its own.
//! 2. An odd level duplicates its last node.
//! 3. Repeat until one digest is left.
//!
//! Leaf order is significant and never re-sorted.

use super::hash::Digest;

const CANONICAL_BIT: u8 = 0x80;

/// Mark a digest as the left half of a pair.
pub fn make_canonical_left(digest: &Digest) -> Digest {
    let mut out = *digest;
    out.0[0] &= !CANONICAL_BIT;
    out
}

/// Mark a digest as the right half of a pair.
pub fn make_canonical_right(digest: &Digest) -> Digest {
    let mut out = *digest;
    out.0[0] |= CANONICAL_BIT;
    out
}

/// Whether a digest carries the left-half marking.
pub fn is_canonical_left(digest: &Digest) -> bool {
    digest.0[0] & CANONICAL_BIT == 0
}

/// Whether a digest carries the right-half marking.
pub fn is_canonical_right(digest: &Digest) -> bool {
    digest.0[0] & CANONICAL_BIT != 0
}

/// Hash a canonicalised pair.
pub fn canonical_pair(left: &Digest, right: &Digest) -> Digest {
    let l = make_canonical_left(left);
    let r = make_canonical_right(right);
    Digest::hash_parts(&[&l.0, &r.0])
}

/// Merkle root of an ordered digest sequence.
///
/// Empty input yields [`Digest::empty_hash`]. A single leaf is still paired
/// with itself, so the root is always the output of at least one pair hash.
///
/// # Example
///
/// ```
/// use eos_ledger::crypto::{merkle, canonical_pair, Digest};
///
/// let leaf = Digest::hash(b"receipt");
/// assert_eq!(merkle(&[leaf]), canonical_pair(&leaf, &leaf));
/// ```
pub fn merkle(digests: &[Digest]) -> Digest {
    if digests.is_empty() {
        return Digest::empty_hash();
    }

    let mut level: Vec<Digest> = digests.to_vec();
    loop {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        let next: Vec<Digest> = level
            .chunks_exact(2)
            .map(|pair| canonical_pair(&pair[0], &pair[1]))
            .collect();

        if next.len() == 1 {
            return next[0];
        }
        level = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(tag: &[u8]) -> Digest {
        Digest::hash(tag)
    }

    #[test]
    fn empty_input_is_nil_hash() {
        assert_eq!(merkle(&[]), Digest::empty_hash());
    }

    #[test]
    fn single_leaf_is_paired_with_itself() {
        let d = leaf(b"only");
        assert_eq!(merkle(&[d]), canonical_pair(&d, &d));
    }

    #[test]
    fn canonical_marks_touch_only_the_top_bit() {
        let d = Digest([0xff; 32]);
        let l = make_canonical_left(&d);
        assert_eq!(l.0[0], 0x7f);
        assert_eq!(&l.0[1..], &d.0[1..]);
        assert!(is_canonical_left(&l));

        let r = make_canonical_right(&Digest::ZERO);
        assert_eq!(r.0[0], 0x80);
        assert!(is_canonical_right(&r));
    }

    #[test]
    fn two_leaf_literal_vector() {
        // sha256("a") and sha256("b"), paired canonically.
        let root = merkle(&[leaf(b"a"), leaf(b"b")]);
        assert_eq!(
            root.to_hex(),
            "39cd7110283b5980c22c81cbfc13698f0991d4d5d9fd2ef5d198ba2352bfb007"
        );
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let (a, b, c) = (leaf(b"a"), leaf(b"b"), leaf(b"c"));
        let expected = canonical_pair(&canonical_pair(&a, &b), &canonical_pair(&c, &c));
        assert_eq!(merkle(&[a, b, c]), expected);
        assert_eq!(
            expected.to_hex(),
            "ec5e7a8bc1d6d737228c3d16a84db6703a9ecc7a7a0bc3b02c05264f9c4f1eda"
        );
    }

    #[test]
    fn four_leaves_build_two_levels() {
        let leaves: Vec<Digest> = (0u8..4).map(|i| leaf(&[i])).collect();
        let expected = canonical_pair(
            &canonical_pair(&leaves[0], &leaves[1]),
            &canonical_pair(&leaves[2], &leaves[3]),
        );
        assert_eq!(merkle(&leaves), expected);
    }

    proptest! {
        #[test]
        fn order_matters(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            // Digests equal up to the canonical bit collapse under marking.
            prop_assume!(a[1..] != b[1..] || (a[0] & 0x7f) != (b[0] & 0x7f));
            let (a, b) = (Digest(a), Digest(b));
            prop_assert_ne!(merkle(&[a, b]), merkle(&[b, a]));
        }

        #[test]
        fn root_is_deterministic(raw in proptest::collection::vec(any::<[u8; 32]>(), 0..17)) {
            let leaves: Vec<Digest> = raw.into_iter().map(Digest).collect();
            prop_assert_eq!(merkle(&leaves), merkle(&leaves));
        }
    }
}
