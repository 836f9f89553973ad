//! thinkalike-bot — headless Think Alike player.
//!
//! Registers a username, quick-joins a room and commits a random noun on
//! every deal until interrupted.
//!
//! ```text
//! thinkalike-bot <username> [tier]
//! ```
//!
//! Server addresses come from `THINKALIKE_WS_URL`, `THINKALIKE_WS_NAMESPACE`
//! and `THINKALIKE_API_BASE`; logging from `RUST_LOG`.

use std::sync::Arc;

use log::{error, info, warn};
use rand::Rng;
use thinkalike_session::protocol::{Deal, RoundResults};
use thinkalike_session::{
    ClientConfig, GameClient, GameSocket, ReconnectSupervisor, RestClient,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(username) = args.next() else {
        eprintln!("usage: thinkalike-bot <username> [tier]");
        std::process::exit(2);
    };
    let tier = args.next();

    if let Err(e) = run(ClientConfig::from_env(), &username, tier.as_deref()).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(
    config: ClientConfig,
    username: &str,
    tier: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let socket = GameSocket::new(config.socket_url()?);
    let client = GameClient::new(&config, socket.clone(), Arc::new(RestClient::new(&config)));
    client.attach(&socket);

    // Pick a random noun on every deal
    let player = client.clone();
    socket.subscribe::<Deal, _>("deal", move |deal| {
        if deal.nouns.is_empty() {
            return;
        }
        let choice = rand::thread_rng().gen_range(0..deal.nouns.len());
        info!("{}: picking {}", deal.adjective, deal.nouns[choice]);
        let player = player.clone();
        tokio::spawn(async move {
            if let Err(e) = player.commit_choice(choice).await {
                warn!("Commit failed: {e}");
            }
        });
    });

    socket.subscribe::<RoundResults, _>("round_results", |results| {
        info!(
            "Round {}: counts {:?}, payout {:.2}, balance {:.2}",
            results.round_key, results.selection_counts, results.payout, results.new_balance
        );
    });

    let supervisor = ReconnectSupervisor::spawn(socket.clone(), config.retry);
    socket.connect().await?;

    let identity = client.register(username).await?;
    info!("Playing as {} with {:.2} coins", identity.username, identity.balance);
    client.quick_join(tier).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if client.snapshot().is_in_room() {
        if let Err(e) = client.leave_room().await {
            warn!("Leave failed: {e}");
        }
    }
    client.logout();
    supervisor.shutdown();
    Ok(())
}
