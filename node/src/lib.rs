//! Run an arbiter committee against a simulated main chain.
//!
//! Every participant runs the full arbiter stack (directory, server, client and dispatcher)
//! over an in-memory network. The main chain, side chain and bookkeeping are mocked: the node
//! funds each configured withdrawal, has the on-duty arbitrator propose it and exits once every
//! proposal has been finalized (or the timeout elapses).
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --bin arbiter-node -- --config node/config.yaml --log-level info
//! ```
//!
//! ```yaml
//! namespace: _ARBITER
//! participants: [1, 2, 3, 4]
//! on_duty: 0
//! threshold: supermajority
//! withdrawals:
//!   - amounts: [1000, 2500]
//!     inputs: 2
//!   - amounts: [700]
//!     inputs: 1
//!     schnorr: true
//! ```

use arbiter::committee::Threshold;
use serde::{Deserialize, Serialize};

/// Quorum policy as written in the config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quorum {
    Supermajority,
    Fixed(usize),
}

impl From<Quorum> for Threshold {
    fn from(quorum: Quorum) -> Self {
        match quorum {
            Quorum::Supermajority => Threshold::Supermajority,
            Quorum::Fixed(m) => Threshold::Fixed(m),
        }
    }
}

/// A withdrawal transaction to fund and propose.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Withdrawal {
    /// Side-chain amounts paid by the transaction.
    pub amounts: Vec<u64>,
    /// Number of federation outputs spent.
    pub inputs: usize,
    /// Sign with an aggregated Schnorr signature instead of a multisig.
    #[serde(default)]
    pub schnorr: bool,
}

/// Configuration for the node.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub namespace: String,
    /// Seeds of the committee members, in committee order.
    pub participants: Vec<u64>,
    pub on_duty: usize,
    pub threshold: Quorum,

    #[serde(default = "defaults::sync_interval_ms")]
    pub sync_interval_ms: u64,
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "defaults::history")]
    pub history: usize,

    #[serde(default = "defaults::mailbox_size")]
    pub mailbox_size: usize,
    #[serde(default = "defaults::batch")]
    pub batch: usize,
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "defaults::answered_capacity")]
    pub answered_capacity: usize,
    /// Mean link latency between participants.
    #[serde(default)]
    pub latency_ms: f64,

    pub withdrawals: Vec<Withdrawal>,
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

impl Config {
    /// Reject configs that cannot form a committee.
    pub fn validate(&self) -> Result<(), String> {
        if self.participants.is_empty() {
            return Err("no participants".into());
        }
        if self.on_duty >= self.participants.len() {
            return Err(format!(
                "on_duty {} out of range for {} participants",
                self.on_duty,
                self.participants.len()
            ));
        }
        let mut seeds = self.participants.clone();
        seeds.sort_unstable();
        seeds.dedup();
        if seeds.len() != self.participants.len() {
            return Err("duplicate participant".into());
        }
        if let Some(index) = self
            .withdrawals
            .iter()
            .position(|w| w.amounts.is_empty() || w.inputs == 0)
        {
            return Err(format!("withdrawal {index} pays nothing or spends nothing"));
        }
        Ok(())
    }
}

mod defaults {
    pub fn sync_interval_ms() -> u64 {
        1_000
    }

    pub fn debounce_ms() -> u64 {
        500
    }

    pub fn history() -> usize {
        16
    }

    pub fn mailbox_size() -> usize {
        1_024
    }

    pub fn batch() -> usize {
        32
    }

    pub fn max_message_size() -> usize {
        1024 * 1024
    }

    pub fn answered_capacity() -> usize {
        4_096
    }

    pub fn timeout_ms() -> u64 {
        10_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
namespace: _ARBITER
participants: [1, 2, 3, 4]
on_duty: 2
threshold:
  fixed: 3
latency_ms: 5.0
withdrawals:
  - amounts: [1000, 2500]
    inputs: 2
  - amounts: [700]
    inputs: 1
    schnorr: true
"#;

    #[test]
    fn test_parse() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.participants, vec![1, 2, 3, 4]);
        assert_eq!(Threshold::from(config.threshold), Threshold::Fixed(3));
        assert_eq!(config.batch, 32);
        assert_eq!(config.timeout_ms, 10_000);
        assert!(!config.withdrawals[0].schnorr);
        assert!(config.withdrawals[1].schnorr);

        let config: Config =
            serde_yaml::from_str(&CONFIG.replace("threshold:\n  fixed: 3", "threshold: supermajority"))
                .unwrap();
        assert_eq!(Threshold::from(config.threshold), Threshold::Supermajority);
    }

    #[test]
    fn test_validate() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();

        let mut invalid = config.clone();
        invalid.on_duty = 4;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.participants = vec![1, 2, 2];
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.withdrawals[0].inputs = 0;
        assert!(invalid.validate().is_err());
    }
}
