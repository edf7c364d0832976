//! Track the arbitrator committee supplied by the main chain.
//!
//! The [Directory] is the single source of truth for who may propose (the on-duty arbitrator),
//! who may co-sign (the ordered committee) and how many signatures form a quorum. It is mutated
//! only by [Directory::sync], which fetches a fresh [Snapshot] whenever the main chain height
//! advances, and keeps a short history of snapshots so that a proposal can be checked against the
//! committee at the height it was proposed.

use crate::{chain::ChainQuery, Error};
use arbiter_cryptography::ed25519::PublicKey;
use arbiter_utils::SystemTimeExt;
use futures::channel::mpsc;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

mod script;
pub use script::{ProgramHash, RedeemScript, ScriptKind, MAX_ARBITRATORS, MAX_SCRIPT_LEN};

/// The committee at some height: the ordered arbitrators and the index of the on-duty one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub arbitrators: Vec<PublicKey>,
    pub on_duty: usize,
}

impl Snapshot {
    /// Ensure the snapshot is usable (non-empty, bounded, unique, in-range duty index).
    pub fn validate(&self) -> Result<(), Error> {
        if self.arbitrators.is_empty() {
            return Err(Error::InvalidCommittee("empty"));
        }
        if self.arbitrators.len() > MAX_ARBITRATORS {
            return Err(Error::InvalidCommittee("too many arbitrators"));
        }
        if self.on_duty >= self.arbitrators.len() {
            return Err(Error::InvalidCommittee("on-duty index out of range"));
        }
        let mut sorted = self.arbitrators.clone();
        sorted.sort();
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(Error::InvalidCommittee("duplicate arbitrator"));
        }
        Ok(())
    }

    /// The arbitrator allowed to originate proposals.
    pub fn on_duty_arbitrator(&self) -> Result<&PublicKey, Error> {
        self.arbitrators.get(self.on_duty).ok_or(Error::NoCommittee)
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.arbitrators.contains(key)
    }
}

/// Number of signatures that form a quorum for a committee of a given size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Threshold {
    /// `ceil(2N/3)`.
    Supermajority,
    /// A fixed count (clamped to `[1, N]`).
    Fixed(usize),
}

impl Threshold {
    pub fn of(&self, n: usize) -> usize {
        match self {
            Threshold::Supermajority => (2 * n).div_ceil(3),
            Threshold::Fixed(m) => (*m).clamp(1, n.max(1)),
        }
    }
}

/// Outcome of [Directory::sync].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Synced {
    /// The previous sync was too recent.
    Debounced,
    /// The main chain height has not advanced.
    Unchanged,
    /// A new snapshot was installed.
    Updated { height: u64 },
}

/// A change in whether some identity is on duty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Duty {
    pub identity: PublicKey,
    pub on_duty: bool,
    pub height: u64,
}

/// Configuration for the [Directory].
#[derive(Clone)]
pub struct Config<Q: ChainQuery> {
    /// Source of heights and committee snapshots.
    pub chain: Q,

    /// Quorum policy, used both to build redeem scripts and to check quorum.
    pub threshold: Threshold,

    /// Minimum time between two syncs.
    pub debounce: Duration,

    /// Number of snapshots retained for proposer checks.
    pub history: usize,
}

#[derive(Default)]
struct State {
    history: VecDeque<(u64, Snapshot)>,
    last_sync: Option<SystemTime>,
    duty: HashMap<PublicKey, bool>,
    listeners: Vec<mpsc::UnboundedSender<Duty>>,
}

impl State {
    fn current(&self) -> Result<&(u64, Snapshot), Error> {
        self.history.back().ok_or(Error::NoCommittee)
    }
}

/// Committee directory shared by every component of a node.
#[derive(Clone)]
pub struct Directory<Q: ChainQuery> {
    chain: Q,
    threshold: Threshold,
    debounce: Duration,
    history: usize,

    state: Arc<Mutex<State>>,
}

impl<Q: ChainQuery> Directory<Q> {
    /// Create an empty directory (every query fails until the first successful sync).
    pub fn new(cfg: Config<Q>) -> Self {
        Self {
            chain: cfg.chain,
            threshold: cfg.threshold,
            debounce: cfg.debounce,
            history: cfg.history.max(1),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Refresh the committee from the main chain.
    ///
    /// Any failure is returned without touching the current snapshot.
    pub async fn sync(&self, now: SystemTime) -> Result<Synced, Error> {
        {
            let state = self.state.lock().unwrap();
            if let Some(last) = state.last_sync {
                if now.saturating_since(last) < self.debounce {
                    return Ok(Synced::Debounced);
                }
            }
        }

        let height = self.chain.current_height().await?;
        {
            let mut state = self.state.lock().unwrap();
            if state.history.back().map(|(h, _)| *h) == Some(height) {
                state.last_sync = Some(now);
                return Ok(Synced::Unchanged);
            }
        }

        let snapshot = self.chain.committee_at(height).await?;
        snapshot.validate()?;

        let mut state = self.state.lock().unwrap();
        if let Some((latest, _)) = state.history.back() {
            if *latest >= height {
                // A concurrent sync already installed this (or a newer) height
                state.last_sync = Some(now);
                return Ok(Synced::Unchanged);
            }
        }
        debug!(
            height,
            arbitrators = snapshot.arbitrators.len(),
            on_duty = snapshot.on_duty,
            "installed committee"
        );
        state.history.push_back((height, snapshot));
        while state.history.len() > self.history {
            state.history.pop_front();
        }
        state.last_sync = Some(now);
        Ok(Synced::Updated { height })
    }

    /// Periodically sync the directory, keeping stale data on failure.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.sync(SystemTime::now()).await {
                Ok(Synced::Updated { height }) => info!(height, "committee updated"),
                Ok(_) => {}
                Err(err) => warn!(?err, "committee sync failed"),
            }
        }
    }

    /// Register a listener for duty transitions.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<Duty> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.lock().unwrap().listeners.push(sender);
        receiver
    }

    /// The arbitrator currently allowed to originate proposals.
    pub fn on_duty_arbitrator(&self) -> Result<PublicKey, Error> {
        let state = self.state.lock().unwrap();
        let (_, snapshot) = state.current()?;
        snapshot.on_duty_arbitrator().cloned()
    }

    /// Number of signatures that form a quorum for the current committee.
    pub fn quorum_size(&self) -> Result<usize, Error> {
        let state = self.state.lock().unwrap();
        let (_, snapshot) = state.current()?;
        Ok(self.threshold.of(snapshot.arbitrators.len()))
    }

    /// Returns whether `identity` is on duty, notifying listeners if that changed since the
    /// last time `identity` was checked.
    pub fn is_currently_on_duty(&self, identity: &PublicKey) -> Result<bool, Error> {
        let mut state = self.state.lock().unwrap();
        let (height, snapshot) = state.current()?;
        let height = *height;
        let on_duty = snapshot.on_duty_arbitrator()? == identity;

        let previous = state.duty.insert(identity.clone(), on_duty).unwrap_or(false);
        if previous != on_duty {
            debug!(?identity, on_duty, height, "duty changed");
            let duty = Duty {
                identity: identity.clone(),
                on_duty,
                height,
            };
            state
                .listeners
                .retain(|listener| listener.unbounded_send(duty.clone()).is_ok());
        }
        Ok(on_duty)
    }

    /// The committee as of `height` (the newest retained snapshot not above it).
    pub fn snapshot_at(&self, height: u64) -> Result<Snapshot, Error> {
        let state = self.state.lock().unwrap();
        let (latest, _) = state.current()?;
        if height > *latest {
            return Err(Error::UnknownHeight(height));
        }
        state
            .history
            .iter()
            .rev()
            .find(|(h, _)| *h <= height)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or(Error::UnknownHeight(height))
    }

    /// The current committee and the height it was fetched at.
    pub fn current(&self) -> Result<(u64, Snapshot), Error> {
        let state = self.state.lock().unwrap();
        state.current().cloned()
    }

    /// Height of the latest snapshot.
    pub fn height(&self) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.history.back().map(|(h, _)| *h)
    }

    /// Number of arbitrators in the current committee.
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .history
            .back()
            .map(|(_, s)| s.arbitrators.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signer index of `key` in the current committee.
    pub fn index_of(&self, key: &PublicKey) -> Option<usize> {
        let state = self.state.lock().unwrap();
        let (_, snapshot) = state.history.back()?;
        snapshot.arbitrators.iter().position(|k| k == key)
    }

    /// Build the redeem script of `kind` for `snapshot` under this directory's quorum policy.
    pub fn script_for(&self, snapshot: &Snapshot, kind: ScriptKind) -> Result<RedeemScript, Error> {
        let n = snapshot.arbitrators.len();
        let threshold = match kind {
            ScriptKind::Multisig => self.threshold.of(n),
            ScriptKind::Schnorr => n,
        };
        RedeemScript::new(kind, threshold, snapshot.arbitrators.clone())
    }

    /// Build the redeem script of `kind` for the current committee.
    pub fn redeem_script(&self, kind: ScriptKind) -> Result<RedeemScript, Error> {
        let (_, snapshot) = self.current()?;
        self.script_for(&snapshot, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{committee, MockChain};
    use futures::StreamExt;

    fn directory(chain: &MockChain, threshold: Threshold) -> Directory<MockChain> {
        Directory::new(Config {
            chain: chain.clone(),
            threshold,
            debounce: Duration::from_millis(500),
            history: 4,
        })
    }

    fn at(millis: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
    }

    #[test]
    fn test_threshold() {
        assert_eq!(Threshold::Supermajority.of(1), 1);
        assert_eq!(Threshold::Supermajority.of(3), 2);
        assert_eq!(Threshold::Supermajority.of(4), 3);
        assert_eq!(Threshold::Supermajority.of(12), 8);
        assert_eq!(Threshold::Supermajority.of(36), 24);
        assert_eq!(Threshold::Fixed(5).of(3), 3);
        assert_eq!(Threshold::Fixed(0).of(3), 1);
        assert_eq!(Threshold::Fixed(2).of(3), 2);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let chain = MockChain::default();
        let directory = directory(&chain, Threshold::Supermajority);
        assert!(matches!(directory.on_duty_arbitrator(), Err(Error::NoCommittee)));
        assert!(matches!(directory.quorum_size(), Err(Error::NoCommittee)));
        assert!(matches!(directory.snapshot_at(0), Err(Error::NoCommittee)));
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_sync_debounce_and_unchanged() {
        let (_, snapshot) = committee(3, 0);
        let chain = MockChain::default();
        chain.set(10, snapshot.clone());
        let directory = directory(&chain, Threshold::Supermajority);

        assert_eq!(
            directory.sync(at(1_000)).await.unwrap(),
            Synced::Updated { height: 10 }
        );
        assert_eq!(directory.quorum_size().unwrap(), 2);
        assert_eq!(
            directory.on_duty_arbitrator().unwrap(),
            snapshot.arbitrators[0]
        );

        // Too soon
        assert_eq!(directory.sync(at(1_200)).await.unwrap(), Synced::Debounced);

        // Height unchanged
        assert_eq!(directory.sync(at(1_600)).await.unwrap(), Synced::Unchanged);
        assert_eq!(chain.committee_queries(), 1);
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_stale_data() {
        let (_, snapshot) = committee(3, 1);
        let chain = MockChain::default();
        chain.set(10, snapshot.clone());
        let directory = directory(&chain, Threshold::Supermajority);
        directory.sync(at(0)).await.unwrap();

        chain.fail(true);
        assert!(matches!(
            directory.sync(at(1_000)).await,
            Err(Error::Rpc(_))
        ));
        assert_eq!(directory.height(), Some(10));
        assert_eq!(
            directory.on_duty_arbitrator().unwrap(),
            snapshot.arbitrators[1]
        );

        // A failed sync does not count against the debounce
        chain.fail(false);
        let (_, next) = committee(3, 2);
        chain.set(11, next.clone());
        assert_eq!(
            directory.sync(at(1_100)).await.unwrap(),
            Synced::Updated { height: 11 }
        );
    }

    #[tokio::test]
    async fn test_invalid_snapshot_rejected() {
        let (_, mut snapshot) = committee(3, 0);
        snapshot.on_duty = 3;
        let chain = MockChain::default();
        chain.set(5, snapshot);
        let directory = directory(&chain, Threshold::Supermajority);
        assert!(matches!(
            directory.sync(at(0)).await,
            Err(Error::InvalidCommittee(_))
        ));
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_history() {
        let chain = MockChain::default();
        let directory = directory(&chain, Threshold::Supermajority);
        for (i, height) in [10u64, 20, 30].into_iter().enumerate() {
            let (_, snapshot) = committee(3, i);
            chain.set(height, snapshot);
            directory.sync(at(height * 1_000)).await.unwrap();
        }

        let (_, first) = committee(3, 0);
        let (_, second) = committee(3, 1);
        assert_eq!(directory.snapshot_at(15).unwrap(), first);
        assert_eq!(directory.snapshot_at(20).unwrap(), second);
        assert!(matches!(
            directory.snapshot_at(31),
            Err(Error::UnknownHeight(31))
        ));
        assert!(matches!(
            directory.snapshot_at(5),
            Err(Error::UnknownHeight(5))
        ));
    }

    #[tokio::test]
    async fn test_duty_notifications() {
        let (_, snapshot) = committee(3, 0);
        let me = snapshot.arbitrators[0].clone();
        let chain = MockChain::default();
        chain.set(1, snapshot);
        let directory = directory(&chain, Threshold::Supermajority);
        let mut listener = directory.listen();
        directory.sync(at(0)).await.unwrap();

        // Fires once on the transition, not on re-observation
        assert!(directory.is_currently_on_duty(&me).unwrap());
        assert!(directory.is_currently_on_duty(&me).unwrap());
        let duty = listener.next().await.unwrap();
        assert!(duty.on_duty);
        assert_eq!(duty.height, 1);

        // Rotation
        let (_, rotated) = committee(3, 1);
        chain.set(2, rotated);
        directory.sync(at(1_000)).await.unwrap();
        assert!(!directory.is_currently_on_duty(&me).unwrap());
        assert!(!directory.is_currently_on_duty(&me).unwrap());
        let duty = listener.next().await.unwrap();
        assert!(!duty.on_duty);
        assert_eq!(duty.height, 2);
        assert!(listener.try_next().is_err());
    }

    #[tokio::test]
    async fn test_scripts_follow_policy() {
        let (_, snapshot) = committee(4, 0);
        let chain = MockChain::default();
        chain.set(1, snapshot);
        let directory = directory(&chain, Threshold::Fixed(2));
        directory.sync(at(0)).await.unwrap();

        let multisig = directory.redeem_script(ScriptKind::Multisig).unwrap();
        assert_eq!(multisig.threshold(), 2);
        assert_eq!(multisig.threshold(), directory.quorum_size().unwrap());
        let schnorr = directory.redeem_script(ScriptKind::Schnorr).unwrap();
        assert_eq!(schnorr.threshold(), 4);
    }
}
