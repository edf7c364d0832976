//! Interfaces to the chains an arbiter works against.
//!
//! The core never talks to a node directly: committee snapshots come from a [ChainQuery],
//! business validation of proposals goes through a [Validator], finished transactions are handed
//! to a [Sink] and their final status is recorded in a [Store].

use crate::{
    committee::{ProgramHash, Snapshot},
    content::{IllegalEvidence, Kind, Outpoint},
};
use arbiter_cryptography::Digest;
use bytes::Bytes;
use std::future::Future;
use thiserror::Error;

/// Main chain error codes meaning the submitted item is already known (treated as success).
pub const DUPLICATE_CODES: &[i64] = &[
    45003, // transaction already in pool
    45010, // transaction already on chain
    45019, // side-chain withdrawal already processed
];

/// A transport-level failure talking to a chain node.
///
/// Never terminal: the operation may be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rpc failed: {0}")]
pub struct RpcError(pub String);

/// Source of main chain heights and committee snapshots.
pub trait ChainQuery: Clone + Send + Sync + 'static {
    /// Current main chain height.
    fn current_height(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// The committee (ordered arbitrators and on-duty index) at `height`.
    fn committee_at(&self, height: u64) -> impl Future<Output = Result<Snapshot, RpcError>> + Send;
}

/// Conversion rate from side-chain to main-chain amounts (`amount * numerator / denominator`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeRate {
    pub numerator: u64,
    pub denominator: u64,
}

impl ExchangeRate {
    /// Convert a side-chain amount, rounding down. Returns `None` for a zero denominator or
    /// a result that does not fit in a `u64`.
    pub fn convert(&self, amount: u64) -> Option<u64> {
        if self.denominator == 0 {
            return None;
        }
        let converted = amount as u128 * self.numerator as u128 / self.denominator as u128;
        u64::try_from(converted).ok()
    }
}

/// A withdrawal requested on a side chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideChainWithdrawal {
    /// Main chain address to pay.
    pub target: ProgramHash,
    /// Side-chain amount (before conversion).
    pub amount: u64,
}

/// An unspent main chain output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub address: ProgramHash,
    pub amount: u64,
}

/// Chain lookups consulted before co-signing a proposal.
pub trait Validator: Clone + Send + Sync + 'static {
    /// Current side-chain to main-chain exchange rate.
    fn exchange_rate(&self) -> impl Future<Output = Result<ExchangeRate, RpcError>> + Send;

    /// Address holding the federation's main chain funds.
    fn genesis_address(&self) -> ProgramHash;

    /// Look up a side-chain withdrawal by transaction hash.
    fn side_chain_withdrawal(
        &self,
        hash: &Digest,
    ) -> impl Future<Output = Result<Option<SideChainWithdrawal>, RpcError>> + Send;

    /// Returns whether a side-chain withdrawal has already been paid out.
    fn is_processed(&self, hash: &Digest) -> impl Future<Output = Result<bool, RpcError>> + Send;

    /// Look up an unspent main chain output.
    fn utxo(
        &self,
        outpoint: &Outpoint,
    ) -> impl Future<Output = Result<Option<Utxo>, RpcError>> + Send;

    /// Returns whether the evidence proves misbehavior.
    fn verify_evidence(
        &self,
        evidence: &IllegalEvidence,
    ) -> impl Future<Output = Result<bool, RpcError>> + Send;
}

/// A main chain node's answer to a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// `None` if accepted, the chain's error code otherwise.
    pub code: Option<i64>,
    pub message: String,
}

impl Response {
    pub fn accepted() -> Self {
        Self {
            code: None,
            message: String::new(),
        }
    }

    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Returns true if the submission landed (or already had).
    pub fn is_success(&self) -> bool {
        match self.code {
            None => true,
            Some(code) => DUPLICATE_CODES.contains(&code),
        }
    }
}

/// Submission endpoint of the main chain.
pub trait Sink: Clone + Send + Sync + 'static {
    /// Broadcast a fully signed transaction.
    fn send_raw_transaction(
        &self,
        transaction: Bytes,
    ) -> impl Future<Output = Result<Response, RpcError>> + Send;

    /// Submit signed evidence of misbehavior.
    fn submit_illegal_evidence(
        &self,
        evidence: Bytes,
    ) -> impl Future<Output = Result<Response, RpcError>> + Send;
}

/// Final status of a submitted item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Succeeded,
    Failed { code: i64, reason: String },
}

/// Bookkeeping entry written once a submission is final.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Chain-level identity of the submitted item.
    pub digest: Digest,
    pub kind: Kind,
    pub status: Status,
}

/// Finished-transaction bookkeeping (and release of any resources reserved for the item).
pub trait Store: Clone + Send + Sync + 'static {
    fn finish(&self, record: Record) -> impl Future<Output = ()> + Send;
}
