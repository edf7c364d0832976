//! Evidence that a committee member misbehaved.

use super::{finish, Answer, Collection, Distributed, Kind, Submission};
use crate::{
    chain::{Sink, Store, Validator},
    committee::{RedeemScript, Snapshot, MAX_ARBITRATORS},
    Custody, Error,
};
use arbiter_codec::{Encode, EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use arbiter_cryptography::ed25519::{PublicKey, Signature};
use bytes::{Buf, BufMut, Bytes};

/// Maximum length of each conflicting message carried by [IllegalEvidence].
pub const MAX_EVIDENCE_LEN: usize = 16 * 1024;

/// Two conflicting messages signed by the same arbitrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IllegalEvidence {
    /// Main chain height the evidence was proposed at.
    pub height: u64,
    pub offender: PublicKey,
    pub first: Bytes,
    pub second: Bytes,
}

impl Write for IllegalEvidence {
    fn write(&self, buf: &mut impl BufMut) {
        self.height.write(buf);
        self.offender.write(buf);
        self.first.write(buf);
        self.second.write(buf);
    }
}

impl EncodeSize for IllegalEvidence {
    fn encode_size(&self) -> usize {
        self.height.encode_size()
            + self.offender.encode_size()
            + self.first.encode_size()
            + self.second.encode_size()
    }
}

impl Read for IllegalEvidence {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let range = RangeCfg::new(1..=MAX_EVIDENCE_LEN);
        let height = u64::read(buf)?;
        let offender = PublicKey::read(buf)?;
        let first = Bytes::read_cfg(buf, &range)?;
        let second = Bytes::read_cfg(buf, &range)?;
        Ok(Self {
            height,
            offender,
            first,
            second,
        })
    }
}

impl Distributed for IllegalEvidence {
    fn kind(&self) -> Kind {
        Kind::Evidence
    }

    fn height(&self) -> u64 {
        self.height
    }

    async fn check<V: Validator>(
        &self,
        validator: &V,
        _: &RedeemScript,
        committee: &Snapshot,
    ) -> Result<(), Error> {
        if !committee.contains(&self.offender) {
            return Err(Error::Check("offender not in committee"));
        }
        if self.first == self.second {
            return Err(Error::Check("evidence does not conflict"));
        }
        if !validator.verify_evidence(self).await? {
            return Err(Error::Check("evidence rejected"));
        }
        Ok(())
    }

    fn answer<C: Custody>(&self, _: &C, _: &RedeemScript) -> Result<Answer, Error> {
        Ok(Answer::Ack)
    }

    fn verify_answer(&self, _: &RedeemScript, _: usize, answer: &Answer) -> Result<(), Error> {
        match answer {
            Answer::Ack => Ok(()),
            _ => Err(Error::InvalidContribution),
        }
    }

    async fn submit<K: Sink, S: Store>(
        &self,
        script: &RedeemScript,
        collection: &Collection,
        sink: &K,
        store: &S,
    ) -> Result<Submission, Error> {
        let signed = SignedEvidence {
            evidence: self.clone(),
            script: script.clone(),
            signatures: collection.signatures(),
        };
        let response = sink
            .submit_illegal_evidence(signed.encode().freeze())
            .await?;
        Ok(finish(store, self.digest(), self.kind(), response).await)
    }
}

/// Evidence co-signed by a quorum of the committee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedEvidence {
    pub evidence: IllegalEvidence,
    pub script: RedeemScript,
    /// Signatures in script order.
    pub signatures: Vec<Signature>,
}

impl Write for SignedEvidence {
    fn write(&self, buf: &mut impl BufMut) {
        self.evidence.write(buf);
        self.script.write(buf);
        self.signatures.write(buf);
    }
}

impl EncodeSize for SignedEvidence {
    fn encode_size(&self) -> usize {
        self.evidence.encode_size() + self.script.encode_size() + self.signatures.encode_size()
    }
}

impl Read for SignedEvidence {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let evidence = IllegalEvidence::read(buf)?;
        let script = RedeemScript::read(buf)?;
        let signatures =
            Vec::<Signature>::read_cfg(buf, &(RangeCfg::new(1..=MAX_ARBITRATORS), ()))?;
        Ok(Self {
            evidence,
            script,
            signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{committee, MockValidator};
    use arbiter_codec::DecodeExt;
    use arbiter_cryptography::{ed25519::PrivateKey, Signer};

    fn evidence(offender: PublicKey) -> IllegalEvidence {
        IllegalEvidence {
            height: 3,
            offender,
            first: Bytes::from_static(b"block a"),
            second: Bytes::from_static(b"block b"),
        }
    }

    #[tokio::test]
    async fn test_check() {
        let (_, snapshot) = committee(3, 0);
        let script =
            RedeemScript::new(crate::committee::ScriptKind::Multisig, 2, snapshot.arbitrators.clone())
                .unwrap();
        let validator = MockValidator::default();

        let valid = evidence(snapshot.arbitrators[1].clone());
        valid.check(&validator, &script, &snapshot).await.unwrap();

        // Offender outside the committee
        let outsider = evidence(PrivateKey::from_seed(42).public_key());
        assert!(matches!(
            outsider.check(&validator, &script, &snapshot).await,
            Err(Error::Check("offender not in committee"))
        ));

        // Identical messages prove nothing
        let mut same = valid.clone();
        same.second = same.first.clone();
        assert!(matches!(
            same.check(&validator, &script, &snapshot).await,
            Err(Error::Check("evidence does not conflict"))
        ));

        // Validator disagrees
        validator.reject_evidence(true);
        assert!(matches!(
            valid.check(&validator, &script, &snapshot).await,
            Err(Error::Check("evidence rejected"))
        ));
    }

    #[test]
    fn test_codec_bounds() {
        let offender = PrivateKey::from_seed(1).public_key();
        let evidence = evidence(offender);
        let encoded = evidence.encode();
        assert_eq!(IllegalEvidence::decode(encoded).unwrap(), evidence);

        let empty = IllegalEvidence {
            first: Bytes::new(),
            ..evidence.clone()
        };
        assert!(IllegalEvidence::decode(empty.encode()).is_err());

        let oversized = IllegalEvidence {
            second: Bytes::from(vec![0u8; MAX_EVIDENCE_LEN + 1]),
            ..evidence
        };
        assert!(matches!(
            IllegalEvidence::decode(oversized.encode()),
            Err(CodecError::InvalidLength(_))
        ));
    }
}
