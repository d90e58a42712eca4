//! Common types for fairdeal: commitments, hash chains, reveal ordering and
//! the phase values exposed by the round contracts.

pub mod chain;
pub mod commitment;
pub mod order;
pub mod phase;
pub mod transcript;

pub use chain::{ChainError, HashChain, DEFAULT_CHAIN_LENGTH, MAX_CHAIN_LENGTH};
pub use commitment::{Commitment, CommitmentError};
pub use order::{compute_order, DerivedEntry, RevealOrder};
pub use phase::{
    CommitRevealPhase, ControllerPhase, GamePhase, Gate, Phase, SetupPhase, UnknownPhase,
    VerifyPhase,
};
pub use transcript::{AuditError, RoundTranscript};

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Keccak256};
use std::fmt;

/// Length of every hash, secret, seed and salt in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of a participant address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Output of [keccak256].
pub type Digest = [u8; DIGEST_LEN];

/// Round identifier assigned by the controller contract.
pub type RoundId = u64;

/// Keccak-256, matching `keccak256(abi.encodePacked(..))` on the ledger.
pub fn keccak256(data: &[u8]) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Address-equivalent handle of a round participant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Participant(#[serde(with = "hex_serde")] pub [u8; ADDRESS_LEN]);

impl Participant {
    /// The zero address, reported by the ledger when no revealer is current.
    pub const ZERO: Self = Self([0u8; ADDRESS_LEN]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl From<[u8; ADDRESS_LEN]> for Participant {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Role of a participant for the lifetime of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The dealer: submits the reveal order, the chain and every deal.
    House,
    Player,
}

/// Finalized output (`omega`) of the commit-reveal2 protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RandomSeed(#[serde(with = "hex_serde")] pub Digest);

impl RandomSeed {
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Display for RandomSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RandomSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomSeed({self})")
    }
}

/// Per-round private value mixed into the hash chain.
///
/// The salt stays secret until the verify phase, so its `Debug` output is
/// redacted.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "hex_serde")] pub [u8; DIGEST_LEN]);

impl Salt {
    /// Draw a fresh 256-bit salt.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; DIGEST_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Big-endian 32-byte encoding, as mixed into `chain[0]`.
    pub fn to_be_bytes(&self) -> [u8; DIGEST_LEN] {
        self.0
    }
}

impl From<u64> for Salt {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes[DIGEST_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(<redacted>)")
    }
}

/// Unsigned 256-bit derived value (`dVal`) computed by the ledger from the
/// reveal1 openings. Stored big-endian so the derived ordering is numeric.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DerivedValue(pub [u8; DIGEST_LEN]);

impl DerivedValue {
    /// Zero marks a non-participating or faulty entry.
    pub fn is_positive(&self) -> bool {
        self.0.iter().any(|byte| *byte != 0)
    }
}

impl From<u64> for DerivedValue {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; DIGEST_LEN];
        bytes[DIGEST_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for DerivedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedValue(0x{})", hex::encode(self.0))
    }
}

/// Serde helpers encoding fixed-size byte arrays as `0x`-prefixed hex.
pub(crate) mod hex_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let value = String::deserialize(deserializer)?;
        decode(&value).map_err(D::Error::custom)
    }

    pub fn decode<const N: usize>(value: &str) -> Result<[u8; N], String> {
        let bytes = hex::decode(value.trim_start_matches("0x")).map_err(|err| err.to_string())?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| format!("expected {N} bytes, got {len}"))
    }

    pub mod seq {
        use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer, const N: usize>(
            items: &[[u8; N]],
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(items.len()))?;
            for item in items {
                seq.serialize_element(&format!("0x{}", hex::encode(item)))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
            deserializer: D,
        ) -> Result<Vec<[u8; N]>, D::Error> {
            let values = Vec::<String>::deserialize(deserializer)?;
            values
                .iter()
                .map(|value| super::decode(value).map_err(D::Error::custom))
                .collect()
        }
    }
}
