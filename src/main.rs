//! bitchatd — BitChat mesh daemon: loads or generates a local identity,
//! brings up the Link and Rendezvous transports, and routes packets between
//! them through the Noise session layer.

use bitchat_core::identity::Identity;
use bitchat_core::noise::SessionManager;
use bitchat_core::router::{Router, RouterDelegate};
use bitchat_core::transport::link::LinkTransport;
use bitchat_core::transport::rendezvous::RendezvousTransport;
use bitchat_core::transport::selector::Selector;
use bitchat_core::transport::{TransportDelegate, TransportState};
use bitchat_core::types::{BitchatMessage, NoisePayloadType, PeerId, PEER_ID_LEN};
use bitchat_core::wire::packet::Packet;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "bitchatd", version, about = "BitChat: peer-to-peer encrypted mesh messenger daemon")]
struct Args {
    /// Directory holding the persisted identity keys.
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Nickname announced to the mesh.
    #[arg(short, long, default_value = "anon")]
    nickname: String,

    /// Battery percent to report to the transport selector (0-100). Below
    /// 15%, directed sends prefer the lower-power Link transport.
    #[arg(long, default_value_t = 100)]
    battery_percent: u8,

    /// Log level passed to the env-filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Bridges router events to the console and transport frames into the
/// router. Holds only a `Weak` back-reference to the router so the two
/// don't form an `Arc` cycle.
struct Daemon {
    router: OnceCell<Weak<Router>>,
    nickname: String,
}

impl Daemon {
    fn new(nickname: String) -> Self {
        Self { router: OnceCell::new(), nickname }
    }

    fn router(&self) -> Option<Arc<Router>> {
        self.router.get().and_then(Weak::upgrade)
    }
}

#[async_trait::async_trait]
impl RouterDelegate for Daemon {
    async fn on_announce(&self, from: PeerId, _payload: Vec<u8>) {
        info!(peer = %from, "peer announced");
    }

    async fn on_message(&self, from: PeerId, message: BitchatMessage) {
        info!(peer = %from, sender = %message.sender, "{}", message.content);
    }

    async fn on_peer_left(&self, from: PeerId) {
        info!(peer = %from, "peer left");
    }

    async fn on_session_established(&self, peer: PeerId) {
        info!(peer = %peer, "noise session established");
    }

    async fn on_handshake_failed(&self, peer: PeerId) {
        warn!(peer = %peer, "noise handshake failed");
    }

    async fn on_delivery_ack(&self, from: PeerId, kind: NoisePayloadType, message_id: String) {
        info!(peer = %from, kind = ?kind, message_id = %message_id, "delivery ack");
    }

    async fn on_fragment(&self, from: PeerId, _payload: Vec<u8>) {
        info!(peer = %from, "fragment received outside transport reassembly");
    }

    async fn on_request_sync(&self, from: PeerId, _payload: Vec<u8>) {
        info!(peer = %from, "sync request received");
    }

    async fn on_file_transfer(&self, from: PeerId, _payload: Vec<u8>) {
        info!(peer = %from, "file transfer chunk received");
    }
}

#[async_trait::async_trait]
impl TransportDelegate for Daemon {
    async fn on_frame(&self, transport_name: &'static str, peer_id: [u8; PEER_ID_LEN], frame: Vec<u8>) {
        let Some(router) = self.router() else { return };
        let packet = match Packet::decode(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(transport = transport_name, peer = %hex::encode(peer_id), error = %e, "dropping undecodable frame");
                return;
            }
        };
        if let Err(e) = router.handle_inbound(packet).await {
            warn!(transport = transport_name, peer = %hex::encode(peer_id), error = %e, "failed to route inbound packet");
        }
    }

    async fn on_peer_connected(&self, transport_name: &'static str, peer_id: [u8; PEER_ID_LEN]) {
        info!(transport = transport_name, peer = %hex::encode(peer_id), "peer connected");
    }

    async fn on_peer_disconnected(&self, transport_name: &'static str, peer_id: [u8; PEER_ID_LEN]) {
        info!(transport = transport_name, peer = %hex::encode(peer_id), "peer disconnected");
    }

    async fn on_state_changed(&self, transport_name: &'static str, state: TransportState) {
        info!(transport = transport_name, state = ?state, "transport state changed");
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("bitchat_core={}", args.log_level).parse().unwrap()),
        )
        .init();

    info!("════════════════════════════════════════════════════════════");
    info!("  BitChat v{VERSION} — mesh daemon");
    info!("════════════════════════════════════════════════════════════");

    let identity = match Identity::load_or_generate(&args.data_dir) {
        Ok(id) => id,
        Err(e) => {
            error!("failed to load or generate identity: {e}");
            return;
        }
    };
    info!(fingerprint = %identity.fingerprint(), nickname = %args.nickname, "identity ready");

    let local_id = identity.short_peer_id();
    let sessions = Arc::new(SessionManager::new(identity.noise_secret().clone()));
    let daemon = Arc::new(Daemon::new(args.nickname.clone()));

    let link = Arc::new(LinkTransport::new(daemon.clone()));
    let rendezvous = Arc::new(RendezvousTransport::new(daemon.clone()));
    let selector = Arc::new(Selector::new(link.clone(), rendezvous.clone()));
    selector.set_battery_percent(args.battery_percent);

    let router = Arc::new(Router::new(local_id, sessions.clone(), daemon.clone(), selector.clone()));
    daemon.router.set(Arc::downgrade(&router)).ok();

    if let Err(e) = router.send_announce(args.nickname.clone().into_bytes()).await {
        warn!("initial announce failed: {e}");
    }

    let maintenance_link = link.clone();
    let maintenance_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
            bitchat_core::transport::link::MAINTENANCE_TICK_SECS,
        ));
        loop {
            interval.tick().await;
            maintenance_link.run_maintenance_pass().await;
            let _ = &maintenance_sessions;
        }
    });

    info!("bitchatd running. Waiting for peer traffic...");
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    link.emergency_disconnect().await;
    sessions.evict_all().await;
}
