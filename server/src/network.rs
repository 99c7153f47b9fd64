//! Socket ownership, packet ingest, first-contact routing, the lobby
//! registry, and the TCP status acceptor.
//!
//! N ingest workers (one per CPU) share the UDP socket. Each worker reads a
//! datagram, deframes it, and routes it: addresses that belong to a lobby go
//! to that lobby's handler; unknown addresses may only speak the
//! first-contact opcodes (ping, accept-request, index-request).

use crate::config::Config;
use crate::filter::SwearFilter;
use crate::lobby::{JoinError, Lobby};
use crate::status::{self, Status};
use crate::steam::{SteamCmd, UsernameCache};
use log::{debug, error, info, trace, warn};
use shared::packet::is_http_get;
use shared::{Packet, PacketType};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::RwLock;

/// Chat words the filter trips on. Operators extend this list to taste.
const DEFAULT_SWEARS: &[&str] = &[];

/// Immutable services every lobby shares: the socket, the configuration,
/// and the external collaborators.
#[derive(Debug)]
pub struct Shared {
    pub config: Config,
    pub socket: Arc<UdpSocket>,
    pub running: AtomicBool,
    pub filter: SwearFilter,
    pub usernames: UsernameCache,
    pub steam: SteamCmd,
}

impl Shared {
    pub fn new(config: Config, socket: Arc<UdpSocket>) -> Arc<Self> {
        let usernames = UsernameCache::new(config.steam_key.clone());
        let steam = SteamCmd::new(
            config.steamcmd_dir.clone(),
            config.steam_username.clone(),
            config.steam_password.clone(),
        );
        Arc::new(Self {
            config,
            socket,
            running: AtomicBool::new(true),
            filter: SwearFilter::new(DEFAULT_SWEARS),
            usernames,
            steam,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

type LobbyRegistry = Arc<RwLock<Vec<Arc<Lobby>>>>;

/// The server: owns both listening sockets and the lobby registry.
pub struct Server {
    shared: Arc<Shared>,
    lobbies: LobbyRegistry,
    tcp: TcpListener,
}

impl Server {
    /// Binds the UDP socket and the TCP status listener on the same
    /// address. Failures here are fatal.
    pub async fn bind(config: Config) -> Result<Self, std::io::Error> {
        let socket = Arc::new(UdpSocket::bind(&config.address).await?);
        info!("Listening on UDP address {}", config.address);

        let tcp = TcpListener::bind(&config.address).await?;
        info!("Listening on TCP address {}", config.address);

        Ok(Self {
            shared: Shared::new(config, socket),
            lobbies: Arc::new(RwLock::new(Vec::new())),
            tcp,
        })
    }

    /// Spawns the ingest workers and the status acceptor, then runs until
    /// SIGINT. Returning from here is the clean-shutdown path.
    pub async fn run(self) {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        for _ in 0..workers {
            let shared = self.shared.clone();
            let lobbies = self.lobbies.clone();
            tokio::spawn(async move {
                ingest_loop(shared, lobbies).await;
            });
        }
        info!("Spawned {workers} ingest workers");

        {
            let shared = self.shared.clone();
            let lobbies = self.lobbies.clone();
            let tcp = self.tcp;
            tokio::spawn(async move {
                accept_loop(tcp, shared, lobbies).await;
            });
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to wait for shutdown signal: {e}");
        }

        info!("Closing server!");
        self.shared.running.store(false, Ordering::Release);
        for lobby in self.lobbies.read().await.iter() {
            lobby.close().await;
        }
    }
}

/// One ingest worker: blocks on the shared socket and handles whatever
/// arrives.
async fn ingest_loop(shared: Arc<Shared>, lobbies: LobbyRegistry) {
    let mut buffer = vec![0u8; shared.config.max_buffer_size];

    while shared.is_running() {
        match shared.socket.recv_from(&mut buffer).await {
            Ok((len, addr)) => {
                handle_datagram(&shared, &lobbies, &buffer[..len], addr).await;
            }
            Err(e) => {
                if !shared.is_running() {
                    break;
                }
                error!("Error receiving packet: {e}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Classifies one datagram: HTTP tunnel, known lobby, or first contact.
async fn handle_datagram(
    shared: &Arc<Shared>,
    lobbies: &LobbyRegistry,
    data: &[u8],
    addr: SocketAddr,
) {
    // The HTTP check comes before any framing interpretation; browsers
    // probing the UDP port get silence, the real endpoint is the TCP side.
    if is_http_get(data) {
        trace!("Ignoring HTTP request on the UDP socket from {addr}");
        return;
    }

    let mut packet = match Packet::from_datagram(data) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Dropping malformed datagram from {addr}: {e}");
            return;
        }
    };
    packet.src = Some(addr);

    if packet.should_log(shared.config.log_player_update) {
        trace!("Received from {addr}: {packet}");
    }

    if let Some(lobby) = lobby_by_addr(lobbies, addr).await {
        lobby.handle(packet).await;
        return;
    }

    match packet.kind {
        PacketType::Ping => client_pong(shared, addr, &packet).await,

        PacketType::ClientRequestingAccepting => client_accept(shared, addr).await,

        PacketType::ClientRequestingIndex => {
            client_requesting_index(shared, lobbies, packet).await;
        }

        // Clients sometimes fire this before they are in a lobby.
        PacketType::KickPlayer => {}

        _ => warn!("Unhandled packet from unknown address {addr}: {packet}"),
    }
}

/// Finds the running lobby that owns an address, without touching any
/// lobby mutex.
async fn lobby_by_addr(lobbies: &LobbyRegistry, addr: SocketAddr) -> Option<Arc<Lobby>> {
    lobbies
        .read()
        .await
        .iter()
        .find(|lobby| lobby.is_running() && lobby.contains_addr(addr))
        .cloned()
}

/// Echoes a ping back as a ping-response, payload intact.
async fn client_pong(shared: &Arc<Shared>, addr: SocketAddr, ping: &Packet) {
    let mut pong = Packet::new(PacketType::PingResponse, 0, 0);
    pong.payload.write_bytes_next(ping.payload.bytes());
    send(shared, &pong, addr).await;
}

/// First-contact accept: the client may proceed to request an index.
async fn client_accept(shared: &Arc<Shared>, addr: SocketAddr) {
    let packet = Packet::new(PacketType::ClientAccepted, 1, 0);
    send(shared, &packet, addr).await;
    debug!("Accepted client {addr}");
}

/// Refuse-shaped `client-init`: accept byte 0 followed by the reason text.
async fn client_reject(shared: &Arc<Shared>, addr: SocketAddr, reason: &str) {
    let mut packet = Packet::new(PacketType::ClientInit, 0, 0);
    packet.payload.write_u8_next(0);
    packet.payload.write_bytes_next(reason.as_bytes());
    send(shared, &packet, addr).await;
    debug!("Rejected client {addr} with reason: {reason}");
}

/// Places a joining client into the first lobby that will take it, or into
/// a fresh one.
async fn client_requesting_index(shared: &Arc<Shared>, lobbies: &LobbyRegistry, mut packet: Packet) {
    let Some(addr) = packet.src else { return };

    let candidates: Vec<Arc<Lobby>> = lobbies
        .read()
        .await
        .iter()
        .filter(|lobby| lobby.is_running())
        .cloned()
        .collect();

    for lobby in candidates {
        match lobby.client_init(&mut packet).await {
            Ok(()) => return,
            Err(e) => debug!("Lobby declined client {addr}: {e}"),
        }
    }

    // No lobby would take them; make a new one. Closed lobbies are
    // compacted out of the registry here.
    let mut registry = lobbies.write().await;
    registry.retain(|lobby| lobby.is_running());
    if registry.len() >= shared.config.max_lobbies {
        error!("Unable to create new lobby: too many lobbies");
        client_reject(shared, addr, "too many lobbies").await;
        return;
    }

    let lobby = Lobby::new(shared.clone());
    match lobby.client_init(&mut packet).await {
        Ok(()) => registry.push(lobby),
        Err(e @ JoinError::Malformed(_)) => {
            // Garbage join requests get dropped, not answered.
            warn!("Malformed index request from {addr}: {e}");
        }
        Err(e) => {
            error!("Unable to init client into new lobby: {e}");
            client_reject(shared, addr, &e.to_string()).await;
        }
    }
}

async fn send(shared: &Arc<Shared>, packet: &Packet, addr: SocketAddr) {
    if let Err(e) = shared.socket.send_to(&packet.to_datagram(), addr).await {
        error!("Failed to send to {addr}: {e}");
    } else if packet.should_log(shared.config.log_player_update) {
        trace!("Sent to {addr}: {packet}");
    }
}

// ---- HTTP status side-channel ---------------------------------------------

/// Accepts TCP connections and answers exactly one HTTP request each.
async fn accept_loop(tcp: TcpListener, shared: Arc<Shared>, lobbies: LobbyRegistry) {
    while shared.is_running() {
        match tcp.accept().await {
            Ok((conn, peer)) => {
                trace!("Accepted TCP client: {peer}");
                let shared = shared.clone();
                let lobbies = lobbies.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_http(conn, &shared, &lobbies).await {
                        debug!("HTTP client {peer} dropped: {e}");
                    }
                });
            }
            Err(e) => {
                error!("Error accepting TCP client: {e}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Reads one request, dispatches by path, writes one response, closes.
/// Reads nothing but atomic counters, never a lobby mutex.
async fn serve_http(
    mut conn: TcpStream,
    shared: &Arc<Shared>,
    lobbies: &LobbyRegistry,
) -> std::io::Result<()> {
    let mut buffer = vec![0u8; 4096];
    let len = conn.read(&mut buffer).await?;

    let response = match status::request_path(&buffer[..len]) {
        Some("/status") => {
            let body = serde_json::to_string(&build_status(shared, lobbies).await)
                .unwrap_or_else(|_| "{}".to_string());
            status::http_response("200 OK", &body)
        }
        Some(path) => {
            debug!("Unhandled GET: {path}");
            status::http_response("404 Not Found", "{\"error\":\"unhandled path\"}")
        }
        None => status::http_response("400 Bad Request", "{\"error\":\"malformed request\"}"),
    };

    conn.write_all(response.as_bytes()).await?;
    conn.shutdown().await
}

/// Snapshots the server statistics from the lock-free mirrors.
pub async fn build_status(shared: &Arc<Shared>, lobbies: &LobbyRegistry) -> Status {
    let registry = lobbies.read().await;
    let running: Vec<_> = registry.iter().filter(|l| l.is_running()).collect();
    Status {
        address: shared.config.address.clone(),
        online: shared.is_running(),
        lobbies: running.len(),
        max_lobbies: shared.config.max_lobbies,
        players_online: running.iter().map(|l| l.player_count()).sum(),
    }
}
