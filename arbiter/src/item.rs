//! The envelope exchanged between proposer and co-signers.
//!
//! An [Item] moves through three states:
//!
//! * unsigned: built by the proposer around some [Content] and the [RedeemScript] it will be
//!   signed under,
//! * proposed: carries the proposer's signature over the content digest and targets the proposer,
//! * feedback: additionally carries a co-signer's [Answer] and its signature over the digest and
//!   the answer, and targets that co-signer.
//!
//! # Encoding
//!
//! ```text
//! target (varint length, 0 or 32 || key)
//! program hash of target (21 bytes, zero when unsigned)
//! tag (content kind | 0x80 when an answer follows)
//! content body
//! answer body (feedback only)
//! redeem script (varint length || script)
//! signatures (varint length: 0, 65 or 130 || slots of 64 || signature)
//! ```

use crate::{
    committee::{ProgramHash, RedeemScript, Snapshot, MAX_SCRIPT_LEN},
    content::{Answer, Content, Contribution, Distributed, Kind},
    Custody, Error,
};
use arbiter_codec::{
    codec::at_least, varint, DecodeExt, EncodeSize, Error as CodecError, FixedSize, Read,
    ReadExt, Write,
};
use arbiter_cryptography::{
    ed25519::{PublicKey, Signature},
    Digest, Verifier,
};
use bytes::{Buf, BufMut};

/// Encoded length of one signature slot (length byte and signature).
pub const SIG_LEN: usize = 1 + Signature::SIZE;

/// Tag bit set when the envelope carries an answer.
const ANSWER_FLAG: u8 = 0x80;

/// A proposal or feedback envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    target: Option<PublicKey>,
    content: Content,
    answer: Option<Answer>,
    script: RedeemScript,
    proposer: Option<Signature>,
    response: Option<Signature>,
}

impl Item {
    /// Wrap `content` for signing under `script`.
    pub fn new(content: Content, script: RedeemScript) -> Result<Self, Error> {
        if content.kind().script_kind() != script.kind() {
            return Err(Error::ScriptMismatch);
        }
        Ok(Self {
            target: None,
            content,
            answer: None,
            script,
            proposer: None,
            response: None,
        })
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn script(&self) -> &RedeemScript {
        &self.script
    }

    /// Signer of the newest signature, if any.
    pub fn target(&self) -> Option<&PublicKey> {
        self.target.as_ref()
    }

    pub fn answer(&self) -> Option<&Answer> {
        self.answer.as_ref()
    }

    /// The proposer's signature over the digest.
    pub fn proposer_signature(&self) -> Option<&Signature> {
        self.proposer.as_ref()
    }

    pub fn digest(&self) -> Digest {
        self.content.digest()
    }

    /// Returns true if the envelope carries a co-signer's answer.
    pub fn is_feedback(&self) -> bool {
        self.response.is_some()
    }

    fn payload(digest: &Digest, answer: &Answer) -> Vec<u8> {
        let mut payload = Vec::with_capacity(Digest::SIZE + answer.encode_size());
        payload.extend_from_slice(digest.as_ref());
        answer.write(&mut payload);
        payload
    }

    /// Sign as the proposer, returning the proposer's signer index.
    pub fn sign<C: Custody>(&mut self, signer: &C, namespace: &[u8]) -> Result<usize, Error> {
        if self.proposer.is_some() {
            return Err(Error::InvalidState);
        }
        let identity = signer.public_key();
        let index = self
            .script
            .index_of(&identity)
            .ok_or(Error::InvalidSigner)?;
        self.proposer = Some(signer.sign(namespace, &self.digest()));
        self.target = Some(identity);
        Ok(index)
    }

    /// Ensure the proposal was signed by the arbitrator on duty in `committee`.
    pub fn verify_proposer(&self, committee: &Snapshot, namespace: &[u8]) -> Result<(), Error> {
        let (Some(target), Some(signature)) = (&self.target, &self.proposer) else {
            return Err(Error::InvalidState);
        };
        if self.response.is_some() {
            return Err(Error::NotProposal);
        }
        if committee.on_duty_arbitrator()? != target {
            return Err(Error::StaleProposer);
        }
        if !target.verify(namespace, &self.digest(), signature) {
            return Err(Error::InvalidProposerSignature);
        }
        Ok(())
    }

    /// Answer a proposal as a co-signer, turning the envelope into feedback.
    ///
    /// `committee` must be the committee at the content's height.
    pub fn sign_feedback<C: Custody>(
        &mut self,
        signer: &C,
        committee: &Snapshot,
        namespace: &[u8],
    ) -> Result<(), Error> {
        if self.proposer.is_none() || self.response.is_some() {
            return Err(Error::InvalidState);
        }
        let identity = signer.public_key();
        if self.script.index_of(&identity).is_none() {
            return Err(Error::InvalidSigner);
        }
        self.verify_proposer(committee, namespace)?;

        let answer = self.content.answer(signer, &self.script)?;
        let signature = signer.sign(namespace, &Self::payload(&self.digest(), &answer));
        self.answer = Some(answer);
        self.response = Some(signature);
        self.target = Some(identity);
        Ok(())
    }

    /// Verify a feedback envelope, returning the responder's program hash and contribution.
    pub fn parse_feedback(&self, namespace: &[u8]) -> Result<(ProgramHash, Contribution), Error> {
        let (Some(target), Some(answer), Some(signature)) =
            (&self.target, &self.answer, &self.response)
        else {
            return Err(Error::NotFeedback);
        };
        let payload = Self::payload(&self.digest(), answer);
        if !target.verify(namespace, &payload, signature) {
            return Err(Error::InvalidFeedbackSignature);
        }
        Ok((
            ProgramHash::from_key(target),
            Contribution {
                answer: answer.clone(),
                signature: signature.clone(),
            },
        ))
    }

    fn slots(&self) -> usize {
        self.proposer.is_some() as usize + self.response.is_some() as usize
    }
}

fn write_slot(signature: &Signature, buf: &mut impl BufMut) {
    (Signature::SIZE as u8).write(buf);
    signature.write(buf);
}

fn read_slot(buf: &mut impl Buf) -> Result<Signature, CodecError> {
    let len = u8::read(buf)? as usize;
    if len != Signature::SIZE {
        return Err(CodecError::InvalidLength(len));
    }
    Signature::read(buf)
}

impl Write for Item {
    fn write(&self, buf: &mut impl BufMut) {
        match &self.target {
            Some(target) => {
                varint::write(PublicKey::SIZE as u64, buf);
                target.write(buf);
                ProgramHash::from_key(target).write(buf);
            }
            None => {
                varint::write(0, buf);
                ProgramHash::from([0u8; ProgramHash::SIZE]).write(buf);
            }
        }
        let flag = if self.answer.is_some() { ANSWER_FLAG } else { 0 };
        (self.content.kind() as u8 | flag).write(buf);
        self.content.write(buf);
        if let Some(answer) = &self.answer {
            answer.write(buf);
        }
        varint::write(self.script.encode_size() as u64, buf);
        self.script.write(buf);

        // A response is only ever stored alongside a proposer signature
        varint::write((self.slots() * SIG_LEN) as u64, buf);
        if let Some(proposer) = &self.proposer {
            write_slot(proposer, buf);
        }
        if let Some(response) = &self.response {
            write_slot(response, buf);
        }
    }
}

impl EncodeSize for Item {
    fn encode_size(&self) -> usize {
        let target = self.target.as_ref().map_or(0, |_| PublicKey::SIZE);
        let script = self.script.encode_size();
        let signatures = self.slots() * SIG_LEN;
        varint::size(target as u64)
            + target
            + ProgramHash::SIZE
            + 1
            + self.content.encode_size()
            + self.answer.as_ref().map_or(0, EncodeSize::encode_size)
            + varint::size(script as u64)
            + script
            + varint::size(signatures as u64)
            + signatures
    }
}

impl Read for Item {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        // Target and its program hash
        let target = match varint::read_len(buf)? {
            0 => None,
            len if len == PublicKey::SIZE => Some(PublicKey::read(buf)?),
            other => return Err(CodecError::InvalidLength(other)),
        };
        let program_hash = ProgramHash::read(buf)?;
        let expected = target
            .as_ref()
            .map_or(ProgramHash::from([0u8; ProgramHash::SIZE]), ProgramHash::from_key);
        if program_hash != expected {
            return Err(CodecError::Invalid("Item", "program hash does not match target"));
        }

        // Content and answer
        let tag = u8::read(buf)?;
        let kind = Kind::try_from(tag & !ANSWER_FLAG)?;
        let feedback = tag & ANSWER_FLAG != 0;
        let content = Content::read_cfg(buf, &kind)?;
        let answer = if feedback {
            Some(Answer::read_cfg(buf, &kind)?)
        } else {
            None
        };

        // Redeem script
        let len = varint::read_len(buf)?;
        if len > MAX_SCRIPT_LEN {
            return Err(CodecError::InvalidLength(len));
        }
        at_least(buf, len)?;
        let script = RedeemScript::decode(buf.copy_to_bytes(len))?;
        if script.kind() != kind.script_kind() {
            return Err(CodecError::Invalid("Item", "script kind does not match content"));
        }

        // Accumulated signatures
        let len = varint::read_len(buf)?;
        let slots = match len {
            0 => 0,
            SIG_LEN => 1,
            len if len == 2 * SIG_LEN => 2,
            other => return Err(CodecError::InvalidLength(other)),
        };
        let proposer = if slots >= 1 {
            Some(read_slot(buf)?)
        } else {
            None
        };
        let response = if slots == 2 {
            Some(read_slot(buf)?)
        } else {
            None
        };
        if feedback != (slots == 2) {
            return Err(CodecError::Invalid("Item", "answer flag does not match signatures"));
        }
        if target.is_some() != (slots > 0) {
            return Err(CodecError::Invalid("Item", "target does not match signatures"));
        }

        Ok(Self {
            target,
            content,
            answer,
            script,
            proposer,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        committee::{ScriptKind, MAX_ARBITRATORS},
        content::{IllegalEvidence, SchnorrRequestR, SchnorrRequestS},
        mocks::{committee, MockValidator},
    };
    use arbiter_codec::Encode;
    use arbiter_cryptography::{ed25519::PrivateKey, schnorr::Keystore};
    use bytes::{Bytes, BytesMut};

    const NAMESPACE: &[u8] = b"_ARBITER_TEST";

    fn proposal(n: usize) -> (Vec<Keystore>, Snapshot, Item) {
        let (keystores, snapshot) = committee(n, 0);
        let script = RedeemScript::new(
            ScriptKind::Multisig,
            n.div_ceil(2),
            snapshot.arbitrators.clone(),
        )
        .unwrap();
        let withdrawal = MockValidator::default().fund_withdrawal(9, 2, &[100, 200]);
        let mut item = Item::new(withdrawal.into(), script).unwrap();
        assert_eq!(item.sign(&keystores[0], NAMESPACE).unwrap(), 0);
        (keystores, snapshot, item)
    }

    #[test]
    fn test_states() {
        let (keystores, snapshot, mut item) = proposal(3);
        assert!(!item.is_feedback());
        assert_eq!(item.target(), Some(&snapshot.arbitrators[0]));
        assert!(matches!(
            item.sign(&keystores[0], NAMESPACE),
            Err(Error::InvalidState)
        ));
        assert!(matches!(
            item.parse_feedback(NAMESPACE),
            Err(Error::NotFeedback)
        ));

        item.sign_feedback(&keystores[1], &snapshot, NAMESPACE).unwrap();
        assert!(item.is_feedback());
        assert_eq!(item.target(), Some(&snapshot.arbitrators[1]));
        assert_eq!(item.answer(), Some(&Answer::Ack));
        assert!(matches!(
            item.sign_feedback(&keystores[2], &snapshot, NAMESPACE),
            Err(Error::InvalidState)
        ));

        let (signer, contribution) = item.parse_feedback(NAMESPACE).unwrap();
        assert_eq!(signer, ProgramHash::from_key(&snapshot.arbitrators[1]));
        assert_eq!(contribution.answer, Answer::Ack);

        // Wrong namespace
        assert!(matches!(
            item.parse_feedback(b"other"),
            Err(Error::InvalidFeedbackSignature)
        ));
    }

    #[test]
    fn test_outsider_cannot_sign() {
        let (_, snapshot, mut item) = proposal(3);
        let outsider = Keystore::new(PrivateKey::from_seed(77));
        assert!(matches!(
            item.sign_feedback(&outsider, &snapshot, NAMESPACE),
            Err(Error::InvalidSigner)
        ));

        let mut unsigned = Item::new(item.content().clone(), item.script().clone()).unwrap();
        assert!(matches!(
            unsigned.sign(&outsider, NAMESPACE),
            Err(Error::InvalidSigner)
        ));
    }

    #[test]
    fn test_stale_proposer() {
        let (keystores, _, mut item) = proposal(3);

        // Duty rotated to the second arbitrator before the proposal arrived
        let (_, rotated) = committee(3, 1);
        assert!(matches!(
            item.sign_feedback(&keystores[2], &rotated, NAMESPACE),
            Err(Error::StaleProposer)
        ));
        assert!(!item.is_feedback());
    }

    #[test]
    fn test_forged_proposer_signature() {
        let (keystores, snapshot, item) = proposal(3);
        let mut encoded = item.encode();
        let len = encoded.len();
        encoded[len - 1] ^= 1;
        let mut forged = Item::decode(encoded).unwrap();
        assert!(matches!(
            forged.sign_feedback(&keystores[1], &snapshot, NAMESPACE),
            Err(Error::InvalidProposerSignature)
        ));
    }

    #[test]
    fn test_script_kind_must_match() {
        let (_, snapshot) = committee(3, 0);
        let multisig =
            RedeemScript::new(ScriptKind::Multisig, 2, snapshot.arbitrators.clone()).unwrap();
        let withdrawal = MockValidator::default().fund_withdrawal(1, 1, &[5]);
        let request = SchnorrRequestR { withdrawal };
        assert!(matches!(
            Item::new(request.into(), multisig),
            Err(Error::ScriptMismatch)
        ));
    }

    #[test]
    fn test_codec() {
        let (keystores, snapshot, mut item) = proposal(4);

        // Proposal
        let encoded = item.encode();
        assert_eq!(encoded.len(), item.encode_size());
        let decoded = Item::decode(encoded.clone()).unwrap();
        assert_eq!(decoded, item);
        assert_eq!(decoded.encode(), encoded);

        // Feedback
        item.sign_feedback(&keystores[3], &snapshot, NAMESPACE).unwrap();
        let encoded = item.encode();
        let decoded = Item::decode(encoded.clone()).unwrap();
        assert!(decoded.is_feedback());
        assert_eq!(decoded, item);

        // Evidence feedback
        let evidence = IllegalEvidence {
            height: 2,
            offender: snapshot.arbitrators[2].clone(),
            first: Bytes::from_static(b"a"),
            second: Bytes::from_static(b"b"),
        };
        let script =
            RedeemScript::new(ScriptKind::Multisig, 3, snapshot.arbitrators.clone()).unwrap();
        let mut item = Item::new(evidence.into(), script).unwrap();
        item.sign(&keystores[0], NAMESPACE).unwrap();
        let encoded = item.encode();
        let decoded = Item::decode(encoded.clone()).unwrap();
        assert_eq!(decoded, item);
        assert_eq!(decoded.encode(), encoded);

        item.sign_feedback(&keystores[1], &snapshot, NAMESPACE).unwrap();
        let encoded = item.encode();
        let decoded = Item::decode(encoded.clone()).unwrap();
        assert_eq!(decoded, item);
        assert_eq!(decoded.encode(), encoded);
    }

    /// Encode `item`, decode it and check the bytes survive unchanged.
    fn assert_round_trip(item: &Item) {
        let encoded = item.encode();
        assert_eq!(encoded.len(), item.encode_size());
        let decoded = Item::decode(encoded.clone()).unwrap();
        assert_eq!(&decoded, item);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_schnorr_codec() {
        let (keystores, snapshot) = committee(3, 0);
        let script =
            RedeemScript::new(ScriptKind::Schnorr, 3, snapshot.arbitrators.clone()).unwrap();
        let withdrawal = MockValidator::default().fund_withdrawal(4, 1, &[50]);

        // Round R proposal and feedback carrying a commitment
        let request = SchnorrRequestR {
            withdrawal: withdrawal.clone(),
        };
        let mut item = Item::new(request.clone().into(), script.clone()).unwrap();
        item.sign(&keystores[0], NAMESPACE).unwrap();
        assert_round_trip(&item);
        item.sign_feedback(&keystores[1], &snapshot, NAMESPACE).unwrap();
        assert!(matches!(item.answer(), Some(Answer::Commitment(_))));
        assert_round_trip(&item);

        // Round S proposal and feedback carrying a share
        let content = Content::from(request);
        let commitments = keystores
            .iter()
            .map(|keystore| match content.answer(keystore, &script).unwrap() {
                Answer::Commitment(commitment) => commitment,
                answer => panic!("unexpected answer: {answer:?}"),
            })
            .collect::<Vec<_>>();
        let request = SchnorrRequestS {
            withdrawal,
            commitments,
        };
        let mut item = Item::new(request.clone().into(), script.clone()).unwrap();
        item.sign(&keystores[0], NAMESPACE).unwrap();
        assert_round_trip(&item);
        item.sign_feedback(&keystores[2], &snapshot, NAMESPACE).unwrap();
        assert!(matches!(item.answer(), Some(Answer::Share(_))));
        assert_round_trip(&item);

        // Commitment count outside 1..=MAX_ARBITRATORS
        for commitments in [
            Vec::new(),
            vec![request.commitments[0]; MAX_ARBITRATORS + 1],
        ] {
            let oversized = SchnorrRequestS {
                withdrawal: request.withdrawal.clone(),
                commitments,
            };
            let mut item = Item::new(oversized.into(), script.clone()).unwrap();
            item.sign(&keystores[0], NAMESPACE).unwrap();
            assert!(Item::decode(item.encode()).is_err());
        }
    }

    /// Rebuild an encoded item with its signature section replaced.
    fn with_signatures(item: &Item, signatures: &[u8], declared: usize) -> BytesMut {
        let encoded = item.encode();
        let signed = item.slots() * SIG_LEN;
        let prefix = encoded.len() - varint::size(signed as u64) - signed;
        let mut tampered = BytesMut::from(&encoded[..prefix]);
        varint::write(declared as u64, &mut tampered);
        tampered.extend_from_slice(signatures);
        tampered
    }

    #[test]
    fn test_signature_bounds() {
        let (_, _, item) = proposal(3);
        let slot = {
            let mut slot = vec![Signature::SIZE as u8];
            slot.extend_from_slice(item.proposer_signature().unwrap().as_ref());
            slot
        };

        // Exactly one slot
        assert!(Item::decode(with_signatures(&item, &slot, SIG_LEN)).is_ok());

        // Lengths that are not whole slots
        let short = &slot[..SIG_LEN - 1];
        assert!(matches!(
            Item::decode(with_signatures(&item, short, SIG_LEN - 1)),
            Err(CodecError::InvalidLength(64))
        ));

        // Three slots
        let three = [slot.clone(), slot.clone(), slot.clone()].concat();
        assert!(matches!(
            Item::decode(with_signatures(&item, &three, 3 * SIG_LEN)),
            Err(CodecError::InvalidLength(195))
        ));

        // Two slots without the answer flag
        let two = [slot.clone(), slot.clone()].concat();
        assert!(matches!(
            Item::decode(with_signatures(&item, &two, 2 * SIG_LEN)),
            Err(CodecError::Invalid("Item", "answer flag does not match signatures"))
        ));

        // Slot with the wrong inner length
        let mut bad = slot.clone();
        bad[0] = 63;
        assert!(matches!(
            Item::decode(with_signatures(&item, &bad, SIG_LEN)),
            Err(CodecError::InvalidLength(63))
        ));

        // Signed by someone but no signatures
        assert!(matches!(
            Item::decode(with_signatures(&item, &[], 0)),
            Err(CodecError::Invalid("Item", "target does not match signatures"))
        ));

        // Trailing bytes
        let mut trailing = item.encode();
        trailing.extend_from_slice(&[0]);
        assert!(matches!(
            Item::decode(trailing),
            Err(CodecError::ExtraData(1))
        ));
    }

    #[test]
    fn test_header_bounds() {
        let (_, _, item) = proposal(3);
        let encoded = item.encode();

        // Target of the wrong length
        let mut tampered = encoded.to_vec();
        tampered[0] = 31;
        assert!(matches!(
            Item::decode(tampered.as_slice()),
            Err(CodecError::InvalidLength(31))
        ));

        // Program hash that does not belong to the target
        let mut tampered = encoded.to_vec();
        tampered[1 + PublicKey::SIZE + 5] ^= 1;
        assert!(matches!(
            Item::decode(tampered.as_slice()),
            Err(CodecError::Invalid("Item", "program hash does not match target"))
        ));

        // Unknown kind
        let mut tampered = encoded.to_vec();
        tampered[1 + PublicKey::SIZE + ProgramHash::SIZE] = 9;
        assert!(matches!(
            Item::decode(tampered.as_slice()),
            Err(CodecError::InvalidEnum(9))
        ));
    }

    #[test]
    fn test_oversized_script_rejected() {
        let (_, _, item) = proposal(3);
        let encoded = item.encode();
        let header = 1 + PublicKey::SIZE + ProgramHash::SIZE + 1 + item.content().encode_size();
        let mut tampered = BytesMut::from(&encoded[..header]);
        varint::write((MAX_SCRIPT_LEN + 1) as u64, &mut tampered);
        tampered.extend_from_slice(&vec![0u8; MAX_SCRIPT_LEN + 1]);
        assert!(matches!(
            Item::decode(tampered),
            Err(CodecError::InvalidLength(len)) if len == MAX_SCRIPT_LEN + 1
        ));
    }

    #[test]
    fn test_unsigned_round_trip() {
        let (_, _, item) = proposal(2);
        let unsigned = Item::new(item.content().clone(), item.script().clone()).unwrap();
        let decoded = Item::decode(unsigned.encode()).unwrap();
        assert_eq!(decoded, unsigned);
        assert!(decoded.target().is_none());
        let (_, snapshot) = committee(2, 0);
        assert!(matches!(
            decoded.verify_proposer(&snapshot, NAMESPACE),
            Err(Error::InvalidState)
        ));
    }
}
