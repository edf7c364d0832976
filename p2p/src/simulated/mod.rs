//! Send messages between arbitrary peers with configurable performance (drops and latency).

mod metrics;
pub mod network;

pub use network::{Config, Link, Network, Receiver, Sender};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("message too large: {0}")]
    MessageTooLarge(usize),
    #[error("network closed")]
    NetworkClosed,
    #[error("peer already registered")]
    AlreadyRegistered,
    #[error("not valid to link self")]
    LinkingSelf,
    #[error("invalid success rate (must be in [0, 1]): {0}")]
    InvalidSuccessRate(f64),
    #[error("invalid latency distribution")]
    InvalidLatency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Receiver as _, Recipients, Sender as _};
    use arbiter_cryptography::{ed25519, Signer};
    use bytes::Bytes;
    use prometheus_client::{encoding::text::encode, registry::Registry};
    use std::collections::HashMap;

    const PERFECT: Link = Link {
        latency_mean: 0.0,
        latency_stddev: 0.0,
        success_rate: 1.0,
    };

    fn config() -> Config {
        Config {
            max_size: 1024,
            mailbox_size: 16,
            seed: 0,
        }
    }

    fn key(seed: u64) -> ed25519::PublicKey {
        ed25519::PrivateKey::from_seed(seed).public_key()
    }

    #[tokio::test]
    async fn test_broadcast_and_unicast() {
        let mut registry = Registry::default();
        let mut network = Network::new(config(), &mut registry);
        let mut agents = HashMap::new();
        for i in 0..4 {
            let pk = key(i);
            agents.insert(pk.clone(), network.register(pk).unwrap());
        }
        network.link_all(PERFECT).unwrap();
        tokio::spawn(network.run());

        // Broadcast reaches everyone but the sender
        let origin = key(0);
        let (mut sender, _) = agents.remove(&origin).unwrap();
        let sent = sender
            .send(Recipients::All, Bytes::from_static(b"proposal"), false)
            .await
            .unwrap();
        assert_eq!(sent.len(), 3);
        assert!(!sent.contains(&origin));
        for (_, receiver) in agents.values_mut() {
            let (from, message) = receiver.recv().await.unwrap();
            assert_eq!(from, origin);
            assert_eq!(message, Bytes::from_static(b"proposal"));
        }

        // Unicast reaches only the addressed peer
        let target = key(2);
        let sent = sender
            .send(Recipients::One(target.clone()), Bytes::from_static(b"hi"), true)
            .await
            .unwrap();
        assert_eq!(sent, vec![target.clone()]);
        let (_, receiver) = agents.get_mut(&target).unwrap();
        assert_eq!(receiver.recv().await.unwrap().1, Bytes::from_static(b"hi"));

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("messages_sent_total"));
    }

    #[tokio::test]
    async fn test_missing_link_and_unknown_peer() {
        let mut registry = Registry::default();
        let mut network = Network::new(config(), &mut registry);
        let (mut a, _) = network.register(key(0)).unwrap();
        let (_, _b) = network.register(key(1)).unwrap();
        assert!(matches!(
            network.register(key(1)),
            Err(Error::AlreadyRegistered)
        ));
        tokio::spawn(network.run());

        let sent = a
            .send(
                Recipients::Some(vec![key(1), key(9)]),
                Bytes::from_static(b"x"),
                false,
            )
            .await
            .unwrap();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let mut registry = Registry::default();
        let mut network = Network::new(config(), &mut registry);
        let (mut a, _) = network.register(key(0)).unwrap();
        let result = a
            .send(Recipients::All, Bytes::from(vec![0u8; 1025]), false)
            .await;
        assert!(matches!(result, Err(Error::MessageTooLarge(1025))));
    }

    #[tokio::test]
    async fn test_closed_network() {
        let mut registry = Registry::default();
        let mut network = Network::new(config(), &mut registry);
        let (mut a, _) = network.register(key(0)).unwrap();
        drop(network);
        let result = a.send(Recipients::All, Bytes::from_static(b"x"), false).await;
        assert!(matches!(result, Err(Error::NetworkClosed)));
    }

    #[test]
    fn test_invalid_links() {
        let mut registry = Registry::default();
        let mut network: Network<ed25519::PublicKey> = Network::new(config(), &mut registry);
        assert!(matches!(
            network.link(key(0), key(0), PERFECT),
            Err(Error::LinkingSelf)
        ));
        let lossy = Link {
            success_rate: 1.5,
            ..PERFECT
        };
        assert!(matches!(
            network.link(key(0), key(1), lossy),
            Err(Error::InvalidSuccessRate(_))
        ));
        let jittery = Link {
            latency_stddev: -1.0,
            ..PERFECT
        };
        assert!(matches!(
            network.link(key(0), key(1), jittery),
            Err(Error::InvalidLatency)
        ));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops() {
        let mut registry = Registry::default();
        let mut network = Network::new(
            Config {
                mailbox_size: 1,
                ..config()
            },
            &mut registry,
        );
        let (mut a, _) = network.register(key(0)).unwrap();
        let (_, mut b) = network.register(key(1)).unwrap();
        network.link_all(PERFECT).unwrap();
        tokio::spawn(network.run());

        // Only the first message fits while nobody reads
        for i in 0..3u8 {
            a.send(Recipients::One(key(1)), Bytes::from(vec![i]), false)
                .await
                .unwrap();
        }
        assert_eq!(b.recv().await.unwrap().1, Bytes::from(vec![0u8]));

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("reason=\"Full\"} 2"));
    }
}
