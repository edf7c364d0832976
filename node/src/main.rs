use arbiter::{
    chain::Status,
    client,
    committee::{self, Directory, Snapshot},
    content::{Content, SchnorrRequestR},
    mocks::{MockChain, MockSink, MockStore, MockValidator},
    network::{self, Dispatcher, Router},
    server,
};
use arbiter_cryptography::{ed25519::PrivateKey, schnorr::Keystore, Signer};
use arbiter_node::Config;
use arbiter_p2p::simulated::{self, Link, Network};
use clap::{Arg, Command};
use futures::StreamExt;
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::{
    str::FromStr,
    time::{Duration, SystemTime},
};
use tracing::{info, warn, Level};

fn main() {
    // Parse arguments
    let matches = Command::new("arbiter-node")
        .about("run an arbiter committee against a simulated main chain")
        .arg(Arg::new("config").long("config").required(true))
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("trace, debug, info, warn or error"),
        )
        .get_matches();

    // Create logger
    let level = matches.get_one::<String>("log-level").unwrap();
    let level = Level::from_str(level).expect("Invalid log level");
    tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .with_line_number(true)
        .with_file(true)
        .init();

    // Load config
    let config_file = matches.get_one::<String>("config").unwrap();
    let config_file = std::fs::read_to_string(config_file).expect("Could not read config file");
    let config: Config = serde_yaml::from_str(&config_file).expect("Could not parse config file");
    config.validate().expect("Invalid config");
    info!(
        participants = config.participants.len(),
        on_duty = config.on_duty,
        threshold = ?config.threshold,
        withdrawals = config.withdrawals.len(),
        "loaded config"
    );

    // Start runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Could not start runtime");
    let registry = runtime.block_on(run(config));

    // Report metrics
    let mut buffer = String::new();
    encode(&mut buffer, &registry).expect("Could not encode metrics");
    print!("{buffer}");
}

async fn run(config: Config) -> Registry {
    let mut registry = Registry::with_prefix("arbiter");
    let namespace = config.namespace.as_bytes().to_vec();

    // Seed the mocked chains
    let keystores: Vec<Keystore> = config
        .participants
        .iter()
        .map(|seed| Keystore::new(PrivateKey::from_seed(*seed)))
        .collect();
    let snapshot = Snapshot {
        arbitrators: keystores.iter().map(|k| k.public_key()).collect(),
        on_duty: config.on_duty,
    };
    let chain = MockChain::default();
    chain.set(1, snapshot);
    let validator = MockValidator::default();
    let sink = MockSink::default();
    let store = MockStore::default();

    // Configure network
    let mut network = Network::new(
        simulated::Config {
            max_size: config.max_message_size,
            mailbox_size: config.mailbox_size,
            seed: 0,
        },
        registry.sub_registry_with_prefix("p2p"),
    );

    // Start every participant
    let mut servers = Vec::new();
    for (index, keystore) in keystores.into_iter().enumerate() {
        let identity = keystore.public_key();
        let (sender, receiver) = network
            .register(identity.clone())
            .expect("Could not register participant");
        let registry = registry.sub_registry_with_prefix(format!("participant_{index}"));

        let directory = Directory::new(committee::Config {
            chain: chain.clone(),
            threshold: config.threshold.into(),
            debounce: Duration::from_millis(config.debounce_ms),
            history: config.history,
        });
        directory
            .sync(SystemTime::now())
            .await
            .expect("Could not sync committee");
        let mut duties = directory.listen();
        tokio::spawn(async move {
            while let Some(duty) = duties.next().await {
                info!(
                    identity = %duty.identity,
                    on_duty = duty.on_duty,
                    height = duty.height,
                    "duty changed"
                );
            }
        });
        tokio::spawn(
            directory
                .clone()
                .run(Duration::from_millis(config.sync_interval_ms)),
        );

        let server = server::Server::new(
            server::Config {
                custody: keystore.clone(),
                directory: directory.clone(),
                sender: sender.clone(),
                sink: sink.clone(),
                store: store.clone(),
                namespace: namespace.clone(),
            },
            registry.sub_registry_with_prefix("server"),
        );
        let client = client::Client::new(
            client::Config {
                custody: keystore,
                directory,
                sender,
                validator: validator.clone(),
                namespace: namespace.clone(),
                answered_capacity: config.answered_capacity,
            },
            registry.sub_registry_with_prefix("client"),
        );
        let dispatcher = Dispatcher::new(
            receiver,
            Router {
                server: server.clone(),
                client,
            },
            network::Config {
                mailbox_size: config.mailbox_size,
                batch: config.batch,
            },
            registry.sub_registry_with_prefix("dispatcher"),
        );
        tokio::spawn(dispatcher.run());
        info!(index, %identity, "started participant");
        servers.push(server);
    }
    network
        .link_all(Link {
            latency_mean: config.latency_ms,
            latency_stddev: config.latency_ms / 4.0,
            success_rate: 1.0,
        })
        .expect("Could not link participants");
    tokio::spawn(network.run());

    // Propose every withdrawal from the on-duty participant
    let proposer = &servers[config.on_duty];
    let mut proposed = 0;
    for withdrawal in &config.withdrawals {
        let funded = validator.fund_withdrawal(1, withdrawal.inputs, &withdrawal.amounts);
        let content: Content = if withdrawal.schnorr {
            SchnorrRequestR { withdrawal: funded }.into()
        } else {
            funded.into()
        };
        match proposer.broadcast_proposal(content).await {
            Ok(progress) => {
                proposed += 1;
                info!(?progress, "proposed withdrawal");
            }
            Err(err) => warn!(?err, "failed to propose withdrawal"),
        }
    }

    // Wait for every proposal to finalize
    let deadline = tokio::time::Instant::now() + Duration::from_millis(config.timeout_ms);
    while store.records().len() < proposed {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                proposed,
                finalized = store.records().len(),
                pending = proposer.pending().len(),
                "timed out waiting for finalization"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for record in store.records() {
        match record.status {
            Status::Succeeded => info!(digest = ?record.digest, kind = ?record.kind, "finalized"),
            Status::Failed { code, reason } => {
                warn!(digest = ?record.digest, kind = ?record.kind, code, %reason, "rejected")
            }
        }
    }
    info!(
        transactions = sink.transactions().len(),
        records = store.records().len(),
        "done"
    );
    registry
}
