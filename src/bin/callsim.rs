use callcore::{Jid, Stanza};
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use xmpp_calls::calls::{CallManager, CallManagerConfig, DEFAULT_STUN_PORT, TransportConfig};
use xmpp_calls::send::ChannelSender;

// Runs two call managers against each other in-process.
//
// Usage:
//   cargo run --bin callsim
//   cargo run --bin callsim -- --group room@conf.example.com
//   cargo run --bin callsim -- --stun 192.0.2.1 --stun 192.0.2.3:3479 --turn 192.0.2.2 --turn-user u --turn-password p

#[derive(Parser)]
#[command(name = "callsim")]
#[command(about = "Loopback Jingle call and Muji session simulator")]
struct Cli {
    #[arg(long, default_value = "alice@example.com/laptop")]
    local: Jid,

    #[arg(long, default_value = "bob@example.com/phone")]
    peer: Jid,

    /// Also negotiate a group call in this room.
    #[arg(long)]
    group: Option<Jid>,

    /// STUN server as host or host:port; may be repeated.
    #[arg(long, value_parser = parse_server)]
    stun: Vec<SocketAddr>,

    #[arg(long, value_parser = parse_server)]
    turn: Option<SocketAddr>,

    #[arg(long, default_value = "")]
    turn_user: String,

    #[arg(long, default_value = "")]
    turn_password: String,

    /// JSON file with STUN/TURN settings; flags override it.
    #[arg(long)]
    transport_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let transport = transport_config(&cli)?;
    info!("Using {:?}", transport);

    let (alice_tx, alice_out) = ChannelSender::new();
    let (bob_tx, bob_out) = ChannelSender::new();
    let alice = CallManager::new(
        CallManagerConfig {
            transport: transport.clone(),
            ..CallManagerConfig::new(cli.local.clone())
        },
        Arc::new(alice_tx),
    );
    let bob = CallManager::new(
        CallManagerConfig {
            transport,
            ..CallManagerConfig::new(cli.peer.clone())
        },
        Arc::new(bob_tx),
    );

    tokio::spawn(pump(alice_out, alice.clone(), bob.clone()));
    tokio::spawn(pump(bob_out, bob.clone(), alice.clone()));

    // Bob answers whatever rings.
    let mut incoming = bob.events().call_received.subscribe();
    tokio::spawn(async move {
        while let Ok(call) = incoming.recv().await {
            info!("{} is ringing from {}", call.sid(), call.remote());
            if let Err(e) = call.accept().await {
                warn!("Failed to accept {}: {}", call.sid(), e);
            }
            // Keep the call alive until the caller hangs up.
            tokio::spawn(async move {
                while !call.state().await.is_terminated() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            });
        }
    });

    let mut ended = alice.events().call_ended.subscribe();
    let call = alice.call(&cli.peer).await?;
    for _ in 0..40 {
        if call.state().await.is_active() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !call.state().await.is_active() {
        error!("Call {} never became active", call.sid());
    }
    for stream in call.streams().await {
        info!(
            "Stream {} ({}): {} payload types negotiated",
            stream.name,
            stream.media,
            stream.negotiated_payload_types.len()
        );
    }

    call.hangup().await?;
    match tokio::time::timeout(Duration::from_secs(2), ended.recv()).await {
        Ok(Ok(event)) => info!("Call {} ended: {}", event.sid, event.reason),
        _ => warn!("No call_ended event received"),
    }

    if let Some(group) = &cli.group {
        let mut prepared = alice.events().group_participants_prepared.subscribe();
        alice.start_group_call(group).await?;
        if let Ok(event) = prepared.try_recv() {
            info!("Participants of {} prepared", event.group);
        }
        bob.start_group_call(group).await?;
        info!(
            "{} publishes {} contents in {}",
            alice.local_jid(),
            alice.group_contents(group).await.len(),
            group
        );
        alice.end_group_call(group).await?;
        bob.end_group_call(group).await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(
        "Done; {} and {} calls still registered",
        alice.registry().len(),
        bob.registry().len()
    );
    Ok(())
}

fn transport_config(cli: &Cli) -> Result<TransportConfig, anyhow::Error> {
    let mut config = match &cli.transport_config {
        Some(path) => TransportConfig::from_json_file(path)?,
        None => TransportConfig::default(),
    };
    if !cli.stun.is_empty() {
        config.set_stun_servers(cli.stun.iter().map(|s| (s.ip(), s.port())).collect());
    }
    if let Some(turn) = cli.turn {
        config.set_turn_server(turn.ip(), turn.port());
    }
    if !cli.turn_user.is_empty() {
        config.set_turn_user(&cli.turn_user);
    }
    if !cli.turn_password.is_empty() {
        config.set_turn_password(&cli.turn_password);
    }
    Ok(config)
}

fn parse_server(s: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_STUN_PORT))
        .map_err(|e| format!("invalid server address '{}': {}", s, e))
}

/// Deliver `owner`'s outgoing stanzas.
///
/// IQs go straight to the peer. Presence addressed to a room is reflected
/// back to its sender and passed to the peer as coming from the sender's
/// occupant address, the way a conference service would.
async fn pump(
    mut outbox: UnboundedReceiver<Stanza>,
    owner: Arc<CallManager>,
    peer: Arc<CallManager>,
) {
    while let Some(stanza) = outbox.recv().await {
        match stanza {
            Stanza::Iq(iq) => {
                peer.handle_stanza(&Stanza::Iq(iq)).await;
            }
            Stanza::Presence(presence) => {
                let room = presence.to.to_bare();
                let nick = owner.local_jid().node.clone();
                let mut relayed = presence.clone();
                relayed.from = room.with_resource(&nick);
                relayed.to = peer.local_jid().clone();

                owner.handle_stanza(&Stanza::Presence(presence)).await;
                peer.handle_stanza(&Stanza::Presence(relayed)).await;
            }
        }
    }
}
