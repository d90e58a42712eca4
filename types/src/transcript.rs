//! Record of a finished round, sufficient to re-derive and check every dealt
//! value offline.

use crate::{
    chain::{ChainError, HashChain, MAX_CHAIN_LENGTH},
    Digest, RandomSeed, RoundId, Salt,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audit failures for a [RoundTranscript].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("chain length {chain_length} exceeds the limit of {MAX_CHAIN_LENGTH}")]
    InvalidLength { chain_length: usize },
    #[error("anchor does not match the regenerated chain")]
    AnchorMismatch,
    #[error("cut value does not match the regenerated chain")]
    CutValueMismatch,
    #[error("dealt value {position} does not match the regenerated chain")]
    DealtMismatch { position: usize },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Everything disclosed about one round once it is resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTranscript {
    pub round: RoundId,
    pub seed: RandomSeed,
    pub salt: Salt,
    pub chain_length: usize,
    pub cut: u64,
    pub cut_tail_offset: usize,
    #[serde(with = "crate::hex_serde")]
    pub anchor: Digest,
    #[serde(with = "crate::hex_serde")]
    pub cut_value: Digest,
    /// Dealt values in the order they were submitted.
    #[serde(with = "crate::hex_serde::seq")]
    pub dealt: Vec<Digest>,
}

impl RoundTranscript {
    /// Regenerate the chain from the seed and salt and check the anchor, the
    /// cut value and every dealt value against it.
    pub fn audit(&self) -> Result<(), AuditError> {
        if self.chain_length > MAX_CHAIN_LENGTH {
            return Err(AuditError::InvalidLength {
                chain_length: self.chain_length,
            });
        }
        let mut chain = HashChain::generate(&self.seed, &self.salt, self.chain_length);
        if chain.anchor() != Some(&self.anchor) {
            return Err(AuditError::AnchorMismatch);
        }
        let cut_value = chain.reveal_cut(self.cut, self.cut_tail_offset)?;
        if cut_value != self.cut_value {
            return Err(AuditError::CutValueMismatch);
        }
        for (position, dealt) in self.dealt.iter().enumerate() {
            if chain.pop()? != *dealt {
                return Err(AuditError::DealtMismatch { position });
            }
        }
        Ok(())
    }

    /// Unpublished, undealt elements left at the end of the round.
    pub fn remaining(&self) -> usize {
        self.chain_length
            .saturating_sub(self.cut_tail_offset)
            .saturating_sub(self.cut as usize)
            .saturating_sub(self.dealt.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DIGEST_LEN;

    fn transcript(dealt: usize) -> RoundTranscript {
        let seed = RandomSeed([7u8; DIGEST_LEN]);
        let salt = Salt::from(42);
        let mut chain = HashChain::generate(&seed, &salt, 21);
        let anchor = *chain.anchor().unwrap();
        let cut_value = chain.reveal_cut(3, 1).unwrap();
        let dealt = (0..dealt).map(|_| chain.pop().unwrap()).collect();
        RoundTranscript {
            round: 4,
            seed,
            salt,
            chain_length: 21,
            cut: 3,
            cut_tail_offset: 1,
            anchor,
            cut_value,
            dealt,
        }
    }

    #[test]
    fn test_honest_transcript_audits() {
        let transcript = transcript(5);
        assert_eq!(transcript.audit(), Ok(()));
        assert_eq!(transcript.remaining(), 12);
    }

    #[test]
    fn test_wrong_salt_fails_anchor() {
        let mut transcript = transcript(2);
        transcript.salt = Salt::from(43);
        assert_eq!(transcript.audit(), Err(AuditError::AnchorMismatch));
    }

    #[test]
    fn test_swapped_deal_detected() {
        let mut transcript = transcript(4);
        transcript.dealt.swap(1, 2);
        assert_eq!(
            transcript.audit(),
            Err(AuditError::DealtMismatch { position: 1 })
        );
    }

    #[test]
    fn test_wrong_cut_detected() {
        let mut transcript = transcript(1);
        transcript.cut = 4;
        assert_eq!(transcript.audit(), Err(AuditError::CutValueMismatch));
    }

    #[test]
    fn test_overdealt_detected() {
        let mut transcript = transcript(17);
        transcript.dealt.push([0u8; DIGEST_LEN]);
        assert_eq!(
            transcript.audit(),
            Err(AuditError::Chain(ChainError::Exhausted))
        );
    }

    #[test]
    fn test_oversized_chain_length_rejected() {
        let mut transcript = transcript(2);
        transcript.chain_length = usize::MAX;
        assert_eq!(
            transcript.audit(),
            Err(AuditError::InvalidLength {
                chain_length: usize::MAX
            })
        );

        let mut json: serde_json::Value = serde_json::to_value(transcript).unwrap();
        json["chain_length"] = serde_json::json!(MAX_CHAIN_LENGTH + 1);
        let decoded: RoundTranscript = serde_json::from_value(json).unwrap();
        assert!(matches!(
            decoded.audit(),
            Err(AuditError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_cut_zero_transcript_audits() {
        let seed = RandomSeed([9u8; DIGEST_LEN]);
        let salt = Salt::from(5);
        let mut chain = HashChain::generate(&seed, &salt, 21);
        let anchor = *chain.anchor().unwrap();
        let cut_value = chain.reveal_cut(0, 1).unwrap();
        let dealt = vec![chain.pop().unwrap(), chain.pop().unwrap()];
        let transcript = RoundTranscript {
            round: 9,
            seed,
            salt,
            chain_length: 21,
            cut: 0,
            cut_tail_offset: 1,
            anchor,
            cut_value,
            dealt,
        };
        assert_eq!(cut_value, anchor);
        assert_eq!(transcript.audit(), Ok(()));
        assert_eq!(transcript.remaining(), 18);
    }

    #[test]
    fn test_json_round_trip() {
        let transcript = transcript(3);
        let json = serde_json::to_string_pretty(&transcript).unwrap();
        assert!(json.contains("\"salt\": \"0x"));
        let decoded: RoundTranscript = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, transcript);
    }
}
