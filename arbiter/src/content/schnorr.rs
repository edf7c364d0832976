//! Two-round Schnorr signing of a withdrawal.
//!
//! The first round ([SchnorrRequestR]) collects one nonce commitment from every script signer.
//! Once complete, it turns into the second round ([SchnorrRequestS]), which carries every
//! commitment and collects one signature share per signer. The shares aggregate into a single
//! ed25519 signature under the aggregate key of the script.

use super::{
    Answer, Collection, Distributed, Kind, SignedWithdrawal, Submission, Withdrawal, Witness,
};
use crate::{
    chain::{Sink, Store, Validator},
    committee::{RedeemScript, Snapshot, MAX_ARBITRATORS},
    Custody, Error,
};
use arbiter_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use arbiter_cryptography::{
    schnorr::{Commitment, Context, Share},
    Digest,
};
use bytes::{Buf, BufMut};
use tracing::debug;

/// Collect nonce commitments for `withdrawal`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchnorrRequestR {
    pub withdrawal: Withdrawal,
}

impl SchnorrRequestR {
    /// The session (and message) every round of this withdrawal signs.
    pub fn session(&self) -> Digest {
        self.withdrawal.digest()
    }
}

impl Write for SchnorrRequestR {
    fn write(&self, buf: &mut impl BufMut) {
        self.withdrawal.write(buf);
    }
}

impl EncodeSize for SchnorrRequestR {
    fn encode_size(&self) -> usize {
        self.withdrawal.encode_size()
    }
}

impl Read for SchnorrRequestR {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            withdrawal: Withdrawal::read(buf)?,
        })
    }
}

impl Distributed for SchnorrRequestR {
    fn kind(&self) -> Kind {
        Kind::SchnorrR
    }

    fn height(&self) -> u64 {
        self.withdrawal.height
    }

    async fn check<V: Validator>(
        &self,
        validator: &V,
        _: &RedeemScript,
        _: &Snapshot,
    ) -> Result<(), Error> {
        self.withdrawal.validate(validator).await
    }

    fn answer<C: Custody>(&self, custody: &C, _: &RedeemScript) -> Result<Answer, Error> {
        Ok(Answer::Commitment(custody.commit(self.session().as_ref())))
    }

    fn verify_answer(&self, _: &RedeemScript, _: usize, answer: &Answer) -> Result<(), Error> {
        match answer {
            Answer::Commitment(_) => Ok(()),
            _ => Err(Error::InvalidContribution),
        }
    }

    async fn submit<K: Sink, S: Store>(
        &self,
        script: &RedeemScript,
        collection: &Collection,
        _: &K,
        _: &S,
    ) -> Result<Submission, Error> {
        let mut commitments = Vec::with_capacity(script.len());
        for (expected, (index, answer)) in collection.answers().enumerate() {
            let Answer::Commitment(commitment) = answer else {
                return Err(Error::InvalidContribution);
            };
            if index != expected {
                return Err(Error::InvalidState);
            }
            commitments.push(*commitment);
        }
        if commitments.len() != script.len() {
            return Err(Error::InvalidState);
        }
        debug!(session = ?self.session(), signers = commitments.len(), "collected commitments");
        Ok(Submission::NextRound(Box::new(
            SchnorrRequestS {
                withdrawal: self.withdrawal.clone(),
                commitments,
            }
            .into(),
        )))
    }
}

/// Collect signature shares for `withdrawal` given every signer's commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchnorrRequestS {
    pub withdrawal: Withdrawal,
    /// One commitment per script signer, in script order.
    pub commitments: Vec<Commitment>,
}

impl SchnorrRequestS {
    /// The session (and message) every round of this withdrawal signs.
    pub fn session(&self) -> Digest {
        self.withdrawal.digest()
    }

    fn context(&self, script: &RedeemScript) -> Result<Context, Error> {
        if self.commitments.len() != script.len() {
            return Err(Error::Check("commitment count mismatch"));
        }
        Ok(Context::new(script.keys().to_vec())?)
    }
}

impl Write for SchnorrRequestS {
    fn write(&self, buf: &mut impl BufMut) {
        self.withdrawal.write(buf);
        self.commitments.write(buf);
    }
}

impl EncodeSize for SchnorrRequestS {
    fn encode_size(&self) -> usize {
        self.withdrawal.encode_size() + self.commitments.encode_size()
    }
}

impl Read for SchnorrRequestS {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let withdrawal = Withdrawal::read(buf)?;
        let commitments =
            Vec::<Commitment>::read_cfg(buf, &(RangeCfg::new(1..=MAX_ARBITRATORS), ()))?;
        Ok(Self {
            withdrawal,
            commitments,
        })
    }
}

impl Distributed for SchnorrRequestS {
    fn kind(&self) -> Kind {
        Kind::SchnorrS
    }

    fn height(&self) -> u64 {
        self.withdrawal.height
    }

    async fn check<V: Validator>(
        &self,
        validator: &V,
        script: &RedeemScript,
        _: &Snapshot,
    ) -> Result<(), Error> {
        if self.commitments.len() != script.len() {
            return Err(Error::Check("commitment count mismatch"));
        }
        self.withdrawal.validate(validator).await
    }

    fn answer<C: Custody>(&self, custody: &C, script: &RedeemScript) -> Result<Answer, Error> {
        let context = self.context(script)?;
        let session = self.session();
        let share = custody.respond(
            session.as_ref(),
            &context,
            &self.commitments,
            session.as_ref(),
        )?;
        Ok(Answer::Share(share))
    }

    fn verify_answer(
        &self,
        script: &RedeemScript,
        index: usize,
        answer: &Answer,
    ) -> Result<(), Error> {
        let Answer::Share(share) = answer else {
            return Err(Error::InvalidContribution);
        };
        let commitment = self
            .commitments
            .get(index)
            .ok_or(Error::InvalidContribution)?;
        let context = self.context(script)?;
        let challenge = context.challenge(&self.commitments, self.session().as_ref())?;
        if !context.verify_share(&challenge, index, commitment, share) {
            return Err(Error::InvalidContribution);
        }
        Ok(())
    }

    async fn submit<K: Sink, S: Store>(
        &self,
        script: &RedeemScript,
        collection: &Collection,
        sink: &K,
        store: &S,
    ) -> Result<Submission, Error> {
        let shares = collection
            .answers()
            .map(|(_, answer)| match answer {
                Answer::Share(share) => Ok(*share),
                _ => Err(Error::InvalidContribution),
            })
            .collect::<Result<Vec<Share>, Error>>()?;

        // Aggregate and make sure the result verifies before handing it to the chain
        let context = self.context(script)?;
        let session = self.session();
        let challenge = context.challenge(&self.commitments, session.as_ref())?;
        let signature = context.aggregate(&challenge, &shares)?;
        let key = context.aggregate_key().clone();
        if !key.verify_raw(session.as_ref(), &signature) {
            return Err(Error::InvalidContribution);
        }
        debug!(?session, %key, "aggregated signature");

        let signed = SignedWithdrawal {
            withdrawal: self.withdrawal.clone(),
            script: script.clone(),
            witness: Witness::Schnorr { key, signature },
        };
        signed.submit(self.kind(), sink, store).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        committee::ScriptKind,
        content::{Content, Contribution},
        mocks::{committee, MockSink, MockStore, MockValidator},
    };
    use arbiter_cryptography::{ed25519::PrivateKey, schnorr::Cosigner, Signer};

    fn contribution(answer: Answer) -> Contribution {
        Contribution {
            answer,
            signature: PrivateKey::from_seed(0).sign(b"unused", b"unused"),
        }
    }

    #[tokio::test]
    async fn test_two_rounds() {
        let (keystores, snapshot) = committee(3, 0);
        let script =
            RedeemScript::new(ScriptKind::Schnorr, 3, snapshot.arbitrators.clone()).unwrap();
        let validator = MockValidator::default();
        let withdrawal = validator.fund_withdrawal(4, 1, &[700]);

        // Round R: every signer commits
        let r = SchnorrRequestR { withdrawal };
        let mut collection = Collection::new(script.threshold());
        for (index, keystore) in keystores.iter().enumerate() {
            let answer = r.answer(keystore, &script).unwrap();
            r.verify_answer(&script, index, &answer).unwrap();
            collection.merge(index, contribution(answer)).unwrap();
        }
        let sink = MockSink::default();
        let store = MockStore::default();
        let Submission::NextRound(next) = r.submit(&script, &collection, &sink, &store).await.unwrap()
        else {
            panic!("expected next round");
        };
        let Content::SchnorrS(s) = *next else {
            panic!("expected round S");
        };
        assert_eq!(s.commitments.len(), 3);
        assert_eq!(s.session(), r.session());

        // Round S: every signer responds
        let mut collection = Collection::new(script.threshold());
        for (index, keystore) in keystores.iter().enumerate() {
            let answer = s.answer(keystore, &script).unwrap();
            s.verify_answer(&script, index, &answer).unwrap();
            collection.merge(index, contribution(answer)).unwrap();
        }
        assert_eq!(
            s.submit(&script, &collection, &sink, &store).await.unwrap(),
            Submission::Accepted
        );
        assert!(keystores.iter().all(|keystore| keystore.outstanding() == 0));

        // The chain received a transaction carrying a valid aggregate signature
        let submitted = sink.transactions();
        assert_eq!(submitted.len(), 1);
        let Witness::Schnorr { key, signature } = &submitted[0].witness else {
            panic!("expected schnorr witness");
        };
        assert!(key.verify_raw(s.session().as_ref(), signature));
        assert_eq!(store.records()[0].digest, s.withdrawal.digest());
    }

    #[tokio::test]
    async fn test_share_for_wrong_signer_rejected() {
        let (keystores, snapshot) = committee(2, 0);
        let script =
            RedeemScript::new(ScriptKind::Schnorr, 2, snapshot.arbitrators.clone()).unwrap();
        let validator = MockValidator::default();
        let withdrawal = validator.fund_withdrawal(4, 1, &[700]);
        let r = SchnorrRequestR { withdrawal };
        let commitments = keystores
            .iter()
            .map(|keystore| keystore.commit(r.session().as_ref()))
            .collect();
        let s = SchnorrRequestS {
            withdrawal: r.withdrawal.clone(),
            commitments,
        };

        let answer = s.answer(&keystores[0], &script).unwrap();
        s.verify_answer(&script, 0, &answer).unwrap();
        assert!(matches!(
            s.verify_answer(&script, 1, &answer),
            Err(Error::InvalidContribution)
        ));
        assert!(matches!(
            s.verify_answer(&script, 0, &Answer::Ack),
            Err(Error::InvalidContribution)
        ));
    }

    #[tokio::test]
    async fn test_commitment_count_checked() {
        let (keystores, snapshot) = committee(3, 0);
        let script =
            RedeemScript::new(ScriptKind::Schnorr, 3, snapshot.arbitrators.clone()).unwrap();
        let validator = MockValidator::default();
        let withdrawal = validator.fund_withdrawal(4, 1, &[700]);
        let session = withdrawal.digest();
        let s = SchnorrRequestS {
            withdrawal,
            commitments: vec![keystores[0].commit(session.as_ref())],
        };
        assert!(matches!(
            s.check(&validator, &script, &snapshot).await,
            Err(Error::Check("commitment count mismatch"))
        ));
        assert!(matches!(
            s.answer(&keystores[0], &script),
            Err(Error::Check("commitment count mismatch"))
        ));
    }
}
