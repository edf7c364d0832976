//! Withdrawal transactions paying side-chain withdrawals out of the federation's funds.

use super::{finish, Answer, Collection, Distributed, Kind, Submission};
use crate::{
    chain::{Sink, Store, Validator},
    committee::{ProgramHash, RedeemScript, Snapshot, MAX_ARBITRATORS},
    Custody, Error,
};
use arbiter_codec::{
    Encode, EncodeSize, Error as CodecError, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use arbiter_cryptography::{
    ed25519::{PublicKey, Signature},
    Digest,
};
use bytes::{Buf, BufMut};
use std::collections::HashSet;

/// Maximum number of side-chain withdrawals paid by one transaction.
pub const MAX_WITHDRAWALS: usize = 256;

/// Maximum number of inputs spent by one transaction.
pub const MAX_INPUTS: usize = 1024;

/// Reference to an output of a main chain transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Outpoint {
    pub tx: Digest,
    pub index: u16,
}

impl Write for Outpoint {
    fn write(&self, buf: &mut impl BufMut) {
        self.tx.write(buf);
        self.index.write(buf);
    }
}

impl Read for Outpoint {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let tx = Digest::read(buf)?;
        let index = u16::read(buf)?;
        Ok(Self { tx, index })
    }
}

impl FixedSize for Outpoint {
    const SIZE: usize = Digest::SIZE + u16::SIZE;
}

impl EncodeSize for Outpoint {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A spent output and the amount it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Input {
    pub outpoint: Outpoint,
    pub amount: u64,
}

impl Write for Input {
    fn write(&self, buf: &mut impl BufMut) {
        self.outpoint.write(buf);
        self.amount.write(buf);
    }
}

impl Read for Input {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let outpoint = Outpoint::read(buf)?;
        let amount = u64::read(buf)?;
        Ok(Self { outpoint, amount })
    }
}

impl FixedSize for Input {
    const SIZE: usize = Outpoint::SIZE + u64::SIZE;
}

impl EncodeSize for Input {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// A payment to a main chain address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Output {
    pub address: ProgramHash,
    pub amount: u64,
}

impl Write for Output {
    fn write(&self, buf: &mut impl BufMut) {
        self.address.write(buf);
        self.amount.write(buf);
    }
}

impl Read for Output {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let address = ProgramHash::read(buf)?;
        let amount = u64::read(buf)?;
        Ok(Self { address, amount })
    }
}

impl FixedSize for Output {
    const SIZE: usize = ProgramHash::SIZE + u64::SIZE;
}

impl EncodeSize for Output {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// An unsigned main chain transaction paying out a batch of side-chain withdrawals.
///
/// Outputs pay each referenced withdrawal in order, optionally followed by a single change
/// output back to the genesis address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Withdrawal {
    /// Main chain height the transaction was built at.
    pub height: u64,
    /// Side-chain withdrawal transactions paid by this transaction.
    pub withdrawals: Vec<Digest>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub fee: u64,
}

impl Write for Withdrawal {
    fn write(&self, buf: &mut impl BufMut) {
        self.height.write(buf);
        self.withdrawals.write(buf);
        self.inputs.write(buf);
        self.outputs.write(buf);
        self.fee.write(buf);
    }
}

impl EncodeSize for Withdrawal {
    fn encode_size(&self) -> usize {
        self.height.encode_size()
            + self.withdrawals.encode_size()
            + self.inputs.encode_size()
            + self.outputs.encode_size()
            + self.fee.encode_size()
    }
}

impl Read for Withdrawal {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let height = u64::read(buf)?;
        let withdrawals = Vec::<Digest>::read_cfg(buf, &(RangeCfg::new(1..=MAX_WITHDRAWALS), ()))?;
        let inputs = Vec::<Input>::read_cfg(buf, &(RangeCfg::new(1..=MAX_INPUTS), ()))?;
        let outputs = Vec::<Output>::read_cfg(buf, &(RangeCfg::new(1..=MAX_WITHDRAWALS + 1), ()))?;
        let fee = u64::read(buf)?;
        Ok(Self {
            height,
            withdrawals,
            inputs,
            outputs,
            fee,
        })
    }
}

impl Withdrawal {
    /// Validate the transaction against the chains.
    pub(crate) async fn validate<V: Validator>(&self, validator: &V) -> Result<(), Error> {
        if self.withdrawals.is_empty() {
            return Err(Error::Check("no withdrawals"));
        }
        let mut seen = HashSet::new();
        if !self.withdrawals.iter().all(|hash| seen.insert(*hash)) {
            return Err(Error::Check("duplicate withdrawal"));
        }
        let paid = self.withdrawals.len();
        if self.outputs.len() != paid && self.outputs.len() != paid + 1 {
            return Err(Error::Check("unexpected output count"));
        }

        // Every withdrawal is paid its converted amount, in order
        let rate = validator.exchange_rate().await?;
        for (hash, output) in self.withdrawals.iter().zip(&self.outputs) {
            let Some(request) = validator.side_chain_withdrawal(hash).await? else {
                return Err(Error::Check("unknown side-chain withdrawal"));
            };
            if validator.is_processed(hash).await? {
                return Err(Error::Check("withdrawal already processed"));
            }
            let expected = rate
                .convert(request.amount)
                .ok_or(Error::Check("amount overflow"))?;
            if output.address != request.target || output.amount != expected {
                return Err(Error::Check("output does not match withdrawal"));
            }
        }

        // Change (if any) returns to the federation
        let genesis = validator.genesis_address();
        if let Some(change) = self.outputs.get(paid) {
            if change.address != genesis {
                return Err(Error::Check("change not paid to genesis"));
            }
        }

        // Inputs are unspent federation outputs
        if self.inputs.is_empty() {
            return Err(Error::Check("no inputs"));
        }
        let mut spent = HashSet::new();
        let mut total_in: u128 = 0;
        for input in &self.inputs {
            if !spent.insert(input.outpoint) {
                return Err(Error::Check("duplicate input"));
            }
            let Some(utxo) = validator.utxo(&input.outpoint).await? else {
                return Err(Error::Check("unknown utxo"));
            };
            if utxo.address != genesis {
                return Err(Error::Check("input not owned by genesis"));
            }
            if utxo.amount != input.amount {
                return Err(Error::Check("input amount mismatch"));
            }
            total_in += input.amount as u128;
        }
        let total_out = self
            .outputs
            .iter()
            .map(|output| output.amount as u128)
            .sum::<u128>()
            + self.fee as u128;
        if total_in != total_out {
            return Err(Error::Check("inputs do not cover outputs and fee"));
        }
        Ok(())
    }
}

impl Distributed for Withdrawal {
    fn kind(&self) -> Kind {
        Kind::Withdrawal
    }

    fn height(&self) -> u64 {
        self.height
    }

    async fn check<V: Validator>(
        &self,
        validator: &V,
        _: &RedeemScript,
        _: &Snapshot,
    ) -> Result<(), Error> {
        self.validate(validator).await
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
        let signed = SignedWithdrawal {
            withdrawal: self.clone(),
            script: script.clone(),
            witness: Witness::Multisig(collection.signatures()),
        };
        signed.submit(self.kind(), sink, store).await
    }
}

/// The proof authorizing a [SignedWithdrawal].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Witness {
    /// `threshold` signatures in script order.
    Multisig(Vec<Signature>),
    /// One signature under the aggregate of every script key.
    Schnorr { key: PublicKey, signature: Signature },
}

const WITNESS_MULTISIG: u8 = 0;
const WITNESS_SCHNORR: u8 = 1;

impl Write for Witness {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Witness::Multisig(signatures) => {
                WITNESS_MULTISIG.write(buf);
                signatures.write(buf);
            }
            Witness::Schnorr { key, signature } => {
                WITNESS_SCHNORR.write(buf);
                key.write(buf);
                signature.write(buf);
            }
        }
    }
}

impl EncodeSize for Witness {
    fn encode_size(&self) -> usize {
        1 + match self {
            Witness::Multisig(signatures) => signatures.encode_size(),
            Witness::Schnorr { key, signature } => key.encode_size() + signature.encode_size(),
        }
    }
}

impl Read for Witness {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            WITNESS_MULTISIG => {
                let signatures =
                    Vec::<Signature>::read_cfg(buf, &(RangeCfg::new(1..=MAX_ARBITRATORS), ()))?;
                Ok(Witness::Multisig(signatures))
            }
            WITNESS_SCHNORR => {
                let key = PublicKey::read(buf)?;
                let signature = Signature::read(buf)?;
                Ok(Witness::Schnorr { key, signature })
            }
            other => Err(CodecError::InvalidEnum(other)),
        }
    }
}

/// A withdrawal with everything the main chain needs to accept it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedWithdrawal {
    pub withdrawal: Withdrawal,
    pub script: RedeemScript,
    pub witness: Witness,
}

impl SignedWithdrawal {
    /// Broadcast to the main chain and record the final status (unless the RPC itself fails).
    pub(crate) async fn submit<K: Sink, S: Store>(
        &self,
        kind: Kind,
        sink: &K,
        store: &S,
    ) -> Result<Submission, Error> {
        let response = sink.send_raw_transaction(self.encode().freeze()).await?;
        Ok(finish(store, self.withdrawal.digest(), kind, response).await)
    }
}

impl Write for SignedWithdrawal {
    fn write(&self, buf: &mut impl BufMut) {
        self.withdrawal.write(buf);
        self.script.write(buf);
        self.witness.write(buf);
    }
}

impl EncodeSize for SignedWithdrawal {
    fn encode_size(&self) -> usize {
        self.withdrawal.encode_size() + self.script.encode_size() + self.witness.encode_size()
    }
}

impl Read for SignedWithdrawal {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let withdrawal = Withdrawal::read(buf)?;
        let script = RedeemScript::read(buf)?;
        let witness = Witness::read(buf)?;
        Ok(Self {
            withdrawal,
            script,
            witness,
        })
    }
}
