//! Two-layer commitment for the commit-reveal2 protocol.
//!
//! ```text
//! opening      = keccak256(secret)
//! commit_value = keccak256(opening)
//! ```
//!
//! `commit_value` is published first, `opening` in reveal1 (enough for the
//! ledger to derive each participant's ordering value), and `secret` in
//! reveal2.

use crate::{keccak256, Digest, DIGEST_LEN};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

/// A commitment whose layers do not hash to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommitmentError {
    /// `keccak256(secret) != opening`.
    #[error("opening does not match secret")]
    OpeningMismatch,
    /// `keccak256(opening) != commit_value`.
    #[error("commit value does not match opening")]
    CommitMismatch,
}

/// Secret plus both hash layers derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct Commitment {
    secret: Digest,
    opening: Digest,
    commit_value: Digest,
}

impl Commitment {
    /// Draw a fresh 256-bit secret and derive both layers.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut secret = [0u8; DIGEST_LEN];
        rng.fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: Digest) -> Self {
        let opening = keccak256(&secret);
        let commit_value = keccak256(&opening);
        Self {
            secret,
            opening,
            commit_value,
        }
    }

    /// Assemble a commitment from externally held parts without checking it.
    pub fn from_parts(secret: Digest, opening: Digest, commit_value: Digest) -> Self {
        Self {
            secret,
            opening,
            commit_value,
        }
    }

    pub fn secret(&self) -> &Digest {
        &self.secret
    }

    pub fn opening(&self) -> &Digest {
        &self.opening
    }

    pub fn commit_value(&self) -> &Digest {
        &self.commit_value
    }

    /// Check both layers. Must hold before submission and before every reveal.
    pub fn verify(&self) -> Result<(), CommitmentError> {
        verify_reveal1(&self.commit_value, &self.opening)?;
        verify_reveal2(&self.opening, &self.secret)
    }
}

impl std::fmt::Debug for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commitment")
            .field("secret", &"<redacted>")
            .field("opening", &hex::encode(self.opening))
            .field("commit_value", &hex::encode(self.commit_value))
            .finish()
    }
}

/// Check a reveal1 opening against its published commit value.
pub fn verify_reveal1(commit_value: &Digest, opening: &Digest) -> Result<(), CommitmentError> {
    if keccak256(opening) != *commit_value {
        return Err(CommitmentError::CommitMismatch);
    }
    Ok(())
}

/// Check a reveal2 secret against its reveal1 opening.
pub fn verify_reveal2(opening: &Digest, secret: &Digest) -> Result<(), CommitmentError> {
    if keccak256(secret) != *opening {
        return Err(CommitmentError::OpeningMismatch);
    }
    Ok(())
}
