//! In-memory chains for exercising arbitrators without a node.

use crate::{
    chain::{
        ChainQuery, ExchangeRate, Record, Response, RpcError, SideChainWithdrawal, Sink, Store,
        Utxo, Validator,
    },
    committee::{ProgramHash, Snapshot},
    content::{IllegalEvidence, Input, Outpoint, Output, SignedEvidence, SignedWithdrawal, Withdrawal},
};
use arbiter_codec::DecodeExt;
use arbiter_cryptography::{ed25519::PrivateKey, schnorr::Keystore, sha256, Digest, Signer};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

/// Build `n` keystores (seeded `0..n`) and their committee with `on_duty` as the proposer.
pub fn committee(n: usize, on_duty: usize) -> (Vec<Keystore>, Snapshot) {
    let keystores: Vec<Keystore> = (0..n as u64)
        .map(|seed| Keystore::new(PrivateKey::from_seed(seed)))
        .collect();
    let arbitrators = keystores.iter().map(|k| k.public_key()).collect();
    (
        keystores,
        Snapshot {
            arbitrators,
            on_duty,
        },
    )
}

#[derive(Default)]
struct ChainState {
    committees: BTreeMap<u64, Snapshot>,
    queries: usize,
    fail: bool,
}

/// A main chain whose height and committees are set by the test.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    /// Advance to `height` with `snapshot` as its committee.
    pub fn set(&self, height: u64, snapshot: Snapshot) {
        self.state.lock().unwrap().committees.insert(height, snapshot);
    }

    /// Make every query fail (or succeed again).
    pub fn fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    /// Number of committee lookups served.
    pub fn committee_queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }
}

impl ChainQuery for MockChain {
    async fn current_height(&self) -> Result<u64, RpcError> {
        let state = self.state.lock().unwrap();
        if state.fail {
            return Err(RpcError("unreachable".into()));
        }
        state
            .committees
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| RpcError("no blocks".into()))
    }

    async fn committee_at(&self, height: u64) -> Result<Snapshot, RpcError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(RpcError("unreachable".into()));
        }
        state.queries += 1;
        state
            .committees
            .range(..=height)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| RpcError(format!("unknown height {height}")))
    }
}

struct ValidatorState {
    rate: ExchangeRate,
    genesis: ProgramHash,
    withdrawals: HashMap<Digest, SideChainWithdrawal>,
    processed: HashSet<Digest>,
    utxos: HashMap<Outpoint, Utxo>,
    next: u64,
    fail: bool,
    reject_evidence: bool,
}

impl Default for ValidatorState {
    fn default() -> Self {
        Self {
            rate: ExchangeRate {
                numerator: 1,
                denominator: 1,
            },
            genesis: ProgramHash::from([0x12; 21]),
            withdrawals: HashMap::new(),
            processed: HashSet::new(),
            utxos: HashMap::new(),
            next: 0,
            fail: false,
            reject_evidence: false,
        }
    }
}

/// Side-chain and main chain state consulted when validating proposals.
#[derive(Clone, Default)]
pub struct MockValidator {
    state: Arc<Mutex<ValidatorState>>,
}

impl MockValidator {
    /// Register side-chain withdrawals of `amounts` and genesis-owned funds split over `inputs`
    /// outputs, returning a balanced transaction (with a change output and a fee) paying them.
    ///
    /// Every call registers fresh withdrawals and outputs.
    pub fn fund_withdrawal(&self, height: u64, inputs: usize, amounts: &[u64]) -> Withdrawal {
        const FEE: u64 = 1;
        const CHANGE: u64 = 100;

        let mut state = self.state.lock().unwrap();
        let mut withdrawals = Vec::with_capacity(amounts.len());
        let mut outputs = Vec::with_capacity(amounts.len() + 1);
        for amount in amounts {
            let id = state.next;
            state.next += 1;
            let hash = sha256::hash(&[b"withdrawal".as_slice(), &id.to_be_bytes()].concat());
            let mut target = [0x21u8; 21];
            target[1..9].copy_from_slice(&id.to_be_bytes());
            let target = ProgramHash::from(target);
            state.withdrawals.insert(
                hash,
                SideChainWithdrawal {
                    target,
                    amount: *amount,
                },
            );
            let converted = state.rate.convert(*amount).unwrap_or_default();
            withdrawals.push(hash);
            outputs.push(Output {
                address: target,
                amount: converted,
            });
        }
        let genesis = state.genesis;
        outputs.push(Output {
            address: genesis,
            amount: CHANGE,
        });

        // Split the total over the inputs, remainder on the last one
        let inputs = inputs.max(1) as u64;
        let total = outputs.iter().map(|o| o.amount).sum::<u64>() + FEE;
        let id = state.next;
        state.next += 1;
        let tx = sha256::hash(&[b"funding".as_slice(), &id.to_be_bytes()].concat());
        let mut funded = Vec::with_capacity(inputs as usize);
        for index in 0..inputs {
            let amount = if index + 1 == inputs {
                total - (total / inputs) * (inputs - 1)
            } else {
                total / inputs
            };
            let outpoint = Outpoint {
                tx,
                index: index as u16,
            };
            state.utxos.insert(
                outpoint,
                Utxo {
                    address: genesis,
                    amount,
                },
            );
            funded.push(Input { outpoint, amount });
        }

        Withdrawal {
            height,
            withdrawals,
            inputs: funded,
            outputs,
            fee: FEE,
        }
    }

    pub fn set_rate(&self, rate: ExchangeRate) {
        self.state.lock().unwrap().rate = rate;
    }

    pub fn mark_processed(&self, hash: Digest) {
        self.state.lock().unwrap().processed.insert(hash);
    }

    /// Move an existing output to another owner.
    pub fn set_utxo_owner(&self, outpoint: Outpoint, owner: ProgramHash) {
        if let Some(utxo) = self.state.lock().unwrap().utxos.get_mut(&outpoint) {
            utxo.address = owner;
        }
    }

    /// Make every lookup fail (or succeed again).
    pub fn fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn reject_evidence(&self, reject: bool) {
        self.state.lock().unwrap().reject_evidence = reject;
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, ValidatorState>, RpcError> {
        let state = self.state.lock().unwrap();
        if state.fail {
            return Err(RpcError("unreachable".into()));
        }
        Ok(state)
    }
}

impl Validator for MockValidator {
    async fn exchange_rate(&self) -> Result<ExchangeRate, RpcError> {
        Ok(self.check()?.rate)
    }

    fn genesis_address(&self) -> ProgramHash {
        self.state.lock().unwrap().genesis
    }

    async fn side_chain_withdrawal(
        &self,
        hash: &Digest,
    ) -> Result<Option<SideChainWithdrawal>, RpcError> {
        Ok(self.check()?.withdrawals.get(hash).cloned())
    }

    async fn is_processed(&self, hash: &Digest) -> Result<bool, RpcError> {
        Ok(self.check()?.processed.contains(hash))
    }

    async fn utxo(&self, outpoint: &Outpoint) -> Result<Option<Utxo>, RpcError> {
        Ok(self.check()?.utxos.get(outpoint).copied())
    }

    async fn verify_evidence(&self, _: &IllegalEvidence) -> Result<bool, RpcError> {
        Ok(!self.check()?.reject_evidence)
    }
}

#[derive(Default)]
struct SinkState {
    response: Option<Response>,
    fail: bool,
    transactions: Vec<Bytes>,
    evidence: Vec<Bytes>,
}

/// A main chain node recording what it is sent.
///
/// Accepts everything unless told otherwise.
#[derive(Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

impl MockSink {
    /// Answer every submission with `response`.
    pub fn respond(&self, response: Response) {
        self.state.lock().unwrap().response = Some(response);
    }

    /// Fail every submission at the transport level (or stop failing).
    pub fn fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    /// Transactions received, decoded.
    pub fn transactions(&self) -> Vec<SignedWithdrawal> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .map(|raw| SignedWithdrawal::decode(raw.clone()).expect("invalid transaction"))
            .collect()
    }

    /// Evidence received, decoded.
    pub fn evidence(&self) -> Vec<SignedEvidence> {
        self.state
            .lock()
            .unwrap()
            .evidence
            .iter()
            .map(|raw| SignedEvidence::decode(raw.clone()).expect("invalid evidence"))
            .collect()
    }

    fn receive(&self, evidence: bool, raw: Bytes) -> Result<Response, RpcError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(RpcError("connection reset".into()));
        }
        if evidence {
            state.evidence.push(raw);
        } else {
            state.transactions.push(raw);
        }
        Ok(state.response.clone().unwrap_or_else(Response::accepted))
    }
}

impl Sink for MockSink {
    async fn send_raw_transaction(&self, transaction: Bytes) -> Result<Response, RpcError> {
        self.receive(false, transaction)
    }

    async fn submit_illegal_evidence(&self, evidence: Bytes) -> Result<Response, RpcError> {
        self.receive(true, evidence)
    }
}

/// Bookkeeping that remembers every record.
#[derive(Clone, Default)]
pub struct MockStore {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MockStore {
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }
}

impl Store for MockStore {
    async fn finish(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }
}
