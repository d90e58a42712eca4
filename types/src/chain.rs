//! Deterministic hash chain dealt from the tail backward.
//!
//! ```text
//! chain[0] = keccak256(seed || salt_be32)
//! chain[i] = keccak256(chain[i - 1])
//! ```
//!
//! Anyone holding the seed and the salt recomputes the identical chain, which
//! is what the verify phase relies on.
//!
//! ## Consumption
//!
//! The chain is used as a stack with a published boundary. The tail
//! (`chain[len - 1]`, the anchor) is committed during setup and is never
//! dealt. Revealing the cut element at index `k` moves the boundary down to
//! `k`; a cut addressing the anchor publishes it again and leaves the
//! boundary where it is. Each [HashChain::pop] hands out the last element below the boundary;
//! popping past `chain[0]` is a fatal fault for the round.

use crate::{keccak256, Digest, RandomSeed, Salt, DIGEST_LEN};
use thiserror::Error;

/// Number of elements generated per round.
pub const DEFAULT_CHAIN_LENGTH: usize = 201;

/// Longest chain anything will generate; one element is 32 bytes.
pub const MAX_CHAIN_LENGTH: usize = 1 << 20;

/// Errors raised while consuming a [HashChain].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Every element below the published boundary has been dealt.
    #[error("hash chain exhausted")]
    Exhausted,
    /// The cut addresses neither an undealt element nor the published boundary.
    #[error("cut {cut} (tail offset {tail_offset}) is out of range for {remaining} unpublished elements")]
    InvalidCut {
        cut: u64,
        tail_offset: usize,
        remaining: usize,
    },
}

/// A generated hash chain plus the index of its published boundary.
#[derive(Clone, PartialEq, Eq)]
pub struct HashChain {
    elements: Vec<Digest>,
    boundary: usize,
}

impl HashChain {
    /// Derive a chain of `length` elements. Pure: the same inputs always
    /// produce the same chain.
    pub fn generate(seed: &RandomSeed, salt: &Salt, length: usize) -> Self {
        let mut elements = Vec::with_capacity(length);
        if length > 0 {
            let mut preimage = [0u8; DIGEST_LEN * 2];
            preimage[..DIGEST_LEN].copy_from_slice(seed.as_bytes());
            preimage[DIGEST_LEN..].copy_from_slice(&salt.to_be_bytes());
            let mut current = keccak256(&preimage);
            elements.push(current);
            for _ in 1..length {
                current = keccak256(&current);
                elements.push(current);
            }
        }
        let boundary = length.saturating_sub(1);
        Self { elements, boundary }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Digest] {
        &self.elements
    }

    pub fn get(&self, index: usize) -> Option<&Digest> {
        self.elements.get(index)
    }

    /// The tail element, committed during setup.
    pub fn anchor(&self) -> Option<&Digest> {
        self.elements.last()
    }

    /// Number of elements that are neither published nor dealt.
    pub fn remaining(&self) -> usize {
        self.boundary
    }

    /// Index of the element disclosed for `cut`: `len - tail_offset - cut`.
    pub fn cut_index(&self, cut: u64, tail_offset: usize) -> Result<usize, ChainError> {
        let invalid = ChainError::InvalidCut {
            cut,
            tail_offset,
            remaining: self.boundary,
        };
        let cut = usize::try_from(cut).map_err(|_| invalid)?;
        let index = self
            .len()
            .checked_sub(tail_offset)
            .and_then(|index| index.checked_sub(cut))
            .ok_or(invalid)?;
        if index > self.boundary || index >= self.len() {
            return Err(invalid);
        }
        Ok(index)
    }

    /// Publish the element at `cut_index(cut, tail_offset)` and move the
    /// boundary onto it. Returns the published element.
    pub fn reveal_cut(&mut self, cut: u64, tail_offset: usize) -> Result<Digest, ChainError> {
        let index = self.cut_index(cut, tail_offset)?;
        self.boundary = index;
        Ok(self.elements[index])
    }

    /// Deal the last unpublished element.
    pub fn pop(&mut self) -> Result<Digest, ChainError> {
        if self.boundary == 0 {
            return Err(ChainError::Exhausted);
        }
        self.boundary -= 1;
        Ok(self.elements[self.boundary])
    }

    /// Check `chain[i + 1] == keccak256(chain[i])` for every adjacent pair.
    pub fn verify_links(&self) -> bool {
        self.elements
            .windows(2)
            .all(|pair| keccak256(&pair[0]) == pair[1])
    }
}

impl std::fmt::Debug for HashChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Elements below the boundary are still secret.
        f.debug_struct("HashChain")
            .field("len", &self.elements.len())
            .field("remaining", &self.boundary)
            .finish()
    }
}

/// Returns true if hashing `from` exactly `steps` times yields `to`.
pub fn verify_segment(from: &Digest, to: &Digest, steps: usize) -> bool {
    let mut current = *from;
    for _ in 0..steps {
        current = keccak256(&current);
    }
    current == *to
}
