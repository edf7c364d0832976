//! Collect committee signatures over withdrawal proposals and finalize them on the main chain.
//!
//! # Overview
//!
//! A committee of arbitrators jointly controls the funds backing a side chain. At any height
//! exactly one of them is on duty: it proposes payloads (withdrawal transactions, evidence of
//! misbehavior and the rounds of a Schnorr signing session) and every other member validates
//! the proposal against the chains before answering it with a signed contribution. Once the
//! proposer has collected a quorum it assembles the final artifact and hands it to the main
//! chain.
//!
//! # Architecture
//!
//! * [committee::Directory] tracks the committee (and its history) as reported by the main
//!   chain, derives the redeem scripts payloads are signed under and notifies listeners of duty
//!   transitions.
//! * [content] defines the payloads and their life cycle ([content::Distributed]).
//! * [item::Item] is the signed envelope exchanged between arbitrators.
//! * [server::Server] proposes payloads and merges feedback until quorum.
//! * [client::Client] answers proposals.
//! * [network::Dispatcher] reads the network, applies per-peer fairness and routes messages to
//!   the server or client.
//!
//! Everything that touches a real chain is behind the traits in [chain].

pub mod chain;
pub mod client;
pub mod committee;
pub mod content;
mod error;
pub use error::Error;
pub mod item;
pub mod metrics;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod network;
pub mod server;

use arbiter_cryptography::{ed25519, schnorr::Cosigner, Signer};

/// The signing identity of an arbitrator: an ed25519 key that can also cosign Schnorr sessions.
pub trait Custody:
    Signer<PublicKey = ed25519::PublicKey, Signature = ed25519::Signature> + Cosigner
{
}

impl<T> Custody for T where
    T: Signer<PublicKey = ed25519::PublicKey, Signature = ed25519::Signature> + Cosigner
{
}
