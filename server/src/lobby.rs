//! The per-lobby state machine.
//!
//! A lobby groups up to `max_players` clients around a shared match
//! lifecycle: lobby map → ready-up → fight → map change → lobby map. All
//! mutation is serialized through one mutex per lobby, and broadcasts fan
//! out while that mutex is held so every client observes state changes and
//! packets in the same order. The only suspensions that happen off-mutex
//! are the pre-match countdown, level loading, and the match driver's
//! sleep slices.

use crate::client::Client;
use crate::commands;
use crate::gamemode::{GameMode, GunGamePlayerData};
use crate::level::{self, Level, SyncableObject, SyncableWeapon};
use crate::network::Shared;
use log::{debug, error, info, trace, warn};
use rand::Rng;
use shared::types::{
    DamageType, FightState, MovementType, NetworkPosition, NetworkWeapon, Projectile, Vector2,
    Vector3,
};
use shared::weapons::{Weapon, TOURNEY_POOL};
use shared::{
    player_index_from_event_channel, player_index_from_update_channel, CodecError, Packet,
    PacketType, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Damage value clients send to report an instant kill.
pub const KILLING_BLOW: f32 = 666.666;

/// Winner index meaning "no one won".
pub const NO_WINNER: u8 = 255;

/// Projectile entries kept from one player update before the rest is
/// skipped over.
const MAX_PROJECTILES: usize = 256;

/// How often match-driver loops wake to observe state.
const DRIVER_SLICE: Duration = Duration::from_millis(100);

/// How often the gun-game task polls the lobby.
const GUN_GAME_SLICE: Duration = Duration::from_millis(10);

/// Why a join request was refused. The message doubles as the reject
/// reason sent back to the client.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("lobby not running")]
    NotRunning,
    #[error("not invited to this lobby")]
    NotInvited,
    #[error("lobby is full")]
    LobbyFull,
    #[error("only one local player is supported")]
    MultiLocalUnsupported,
    #[error("protocol version {0} is unsupported")]
    WrongProtocol(u8),
    #[error("packet has no source address")]
    NoSource,
    #[error("malformed join request: {0}")]
    Malformed(#[from] CodecError),
}

/// Lock-free mirrors of lobby facts needed by paths that must not touch the
/// lobby mutex: packet routing and the HTTP status page.
#[derive(Debug, Default)]
pub struct LobbyMirror {
    running: AtomicBool,
    players: AtomicUsize,
    addrs: std::sync::Mutex<Vec<SocketAddr>>,
}

impl LobbyMirror {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn player_count(&self) -> usize {
        self.players.load(Ordering::Acquire)
    }

    pub fn contains_addr(&self, addr: SocketAddr) -> bool {
        self.addrs
            .lock()
            .map(|addrs| addrs.contains(&addr))
            .unwrap_or(false)
    }

    fn sync(&self, running: bool, players: usize, addrs: Vec<SocketAddr>) {
        self.running.store(running, Ordering::Release);
        self.players.store(players, Ordering::Release);
        if let Ok(mut guard) = self.addrs.lock() {
            *guard = addrs;
        }
    }
}

/// Everything behind the lobby mutex.
#[derive(Debug)]
pub struct LobbyState {
    shared: Arc<Shared>,
    mirror: Arc<LobbyMirror>,

    // Settings.
    pub max_players: usize,
    pub health: u8,
    pub regen: u8,
    pub weapon_spawn_rate_min: u64,
    pub weapon_spawn_rate_max: u64,
    pub public: bool,
    pub tourney_rules: bool,
    pub invited: Vec<u64>,
    pub random_maps: bool,

    // Session.
    pub running: bool,
    pub owner: u64,
    pub last_timestamp: u32,
    pub current_level: Arc<Level>,
    pub fight_start: Option<Instant>,
    pub completed_since_stats: u32,
    pub last_applied_scale: f32,
    pub last_spawned_weapon_on_left: bool,
    checking_winner: bool,
    pub game_mode: GameMode,

    pub clients: Vec<Client>,
    pub levels: Vec<Arc<Level>>,
    pub lobby_levels: Vec<Arc<Level>>,
    pub spawned_weapons: HashMap<u16, SyncableWeapon>,
    pub spawned_objects: HashMap<u16, SyncableObject>,
}

/// One lobby. Cheap to share; all gameplay state lives in [`LobbyState`]
/// behind the mutex.
#[derive(Debug)]
pub struct Lobby {
    pub shared: Arc<Shared>,
    created: Instant,
    mirror: Arc<LobbyMirror>,
    pub state: Mutex<LobbyState>,
}

impl Lobby {
    pub fn new(shared: Arc<Shared>) -> Arc<Self> {
        let mirror = Arc::new(LobbyMirror::default());
        mirror.running.store(true, Ordering::Release);

        let lobby_levels = level::default_lobby_levels();
        let current_level = {
            let mut rng = rand::thread_rng();
            lobby_levels[rng.gen_range(0..lobby_levels.len())].clone()
        };

        Arc::new(Self {
            shared: shared.clone(),
            created: Instant::now(),
            mirror: mirror.clone(),
            state: Mutex::new(LobbyState {
                shared,
                mirror,
                max_players: 4,
                health: 0,
                regen: 0,
                weapon_spawn_rate_min: 5,
                weapon_spawn_rate_max: 8,
                public: true,
                tourney_rules: false,
                invited: Vec::new(),
                random_maps: true,
                running: true,
                owner: 0,
                last_timestamp: 0,
                current_level,
                fight_start: None,
                completed_since_stats: 0,
                last_applied_scale: 1.0,
                last_spawned_weapon_on_left: false,
                checking_winner: false,
                game_mode: GameMode::default(),
                clients: Vec::new(),
                levels: level::default_rotation(),
                lobby_levels,
                spawned_weapons: HashMap::new(),
                spawned_objects: HashMap::new(),
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.mirror.is_running()
    }

    pub fn player_count(&self) -> usize {
        self.mirror.player_count()
    }

    pub fn contains_addr(&self, addr: SocketAddr) -> bool {
        self.mirror.contains_addr(addr)
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.running {
            state.close();
            info!("Closing lobby after {:?}!", self.created.elapsed());
        }
    }

    /// Admits a client from a `client-requesting-index` packet, or explains
    /// why not.
    pub async fn client_init(&self, packet: &mut Packet) -> Result<(), JoinError> {
        self.state.lock().await.client_init(packet).await
    }

    /// Dispatches one packet from an address that belongs to this lobby.
    pub async fn handle(self: &Arc<Self>, mut packet: Packet) {
        let mut try_start = false;
        {
            let mut state = self.state.lock().await;
            if !state.running {
                return;
            }

            if packet.should_check_time() {
                if packet.timestamp < state.last_timestamp {
                    warn!("Packet from {:?} too old: {packet}", packet.src);
                    return;
                }
                state.last_timestamp = packet.timestamp;
            }

            let result = state.dispatch(&mut packet).await;
            match result {
                Ok(outcome) => try_start = outcome,
                Err(e) => warn!("Dropping malformed {} from {:?}: {e}", packet.kind, packet.src),
            }
        }

        if try_start {
            tokio::spawn(Arc::clone(self).start_match());
        }
    }

    /// Runs the match lifecycle from "everyone is ready" to the end of the
    /// fight. Spawned once per start attempt; every phase revalidates under
    /// the mutex because the lobby may have changed while sleeping.
    pub async fn start_match(self: Arc<Self>) {
        let current_level = {
            let mut state = self.state.lock().await;
            if !state.running {
                return;
            }
            if state.current_is_lobby() {
                warn!("Can't start match on lobby map!");
                return;
            }
            if state.match_in_progress() {
                warn!("Can't start match when already in fight!");
                return;
            }
            if !state.game_mode.is_done() {
                warn!("Can't start match while the previous one is still processing!");
                return;
            }

            if let Some(index) = state.first_unready_player() {
                state.player_said(index, "I'm not ready!").await;
                state
                    .player_thought(index, "If you can't ready up,\ntry typing /ready")
                    .await;
                warn!("Can't start match until all players are ready!");
                return;
            }

            state.current_level.clone()
        };

        // Pre-match visual wait, off the mutex.
        tokio::time::sleep(Duration::from_secs(3)).await;

        // Placement data comes from disk and a subprocess; load it before
        // re-locking. A failed load falls back to the bare wire form.
        if let Err(e) = current_level.load(&self.shared.steam).await {
            error!("Unable to load placements for {current_level}: {e}");
        }

        let gun_game = {
            let mut state = self.state.lock().await;
            if !state.running || state.current_is_lobby() || state.match_in_progress() {
                return;
            }

            state.init_map().await;
            state.fight_start = Some(Instant::now());
            state
                .broadcast(&Packet::new(PacketType::StartMatch, 0, 0), None)
                .await;
            info!("Started match with gamemode: {}", state.game_mode.name());

            state.prepare_gun_game().await;
            matches!(state.game_mode, GameMode::GunGame(_))
        };

        if gun_game {
            tokio::spawn(Arc::clone(&self).run_gun_game());
        }

        self.run_spawn_ticker().await;
    }

    /// The match driver: spawns weapons on the rolled cadence until the
    /// fight ends. Sleeps in short slices so it exits within one tick of
    /// the fight ending or the lobby closing.
    async fn run_spawn_ticker(self: Arc<Self>) {
        let mut wait = {
            let state = self.state.lock().await;
            if !state.game_mode.spawns_weapons() {
                return;
            }
            state.roll_spawn_wait()
        };
        let mut last_spawn = Instant::now();

        loop {
            tokio::time::sleep(DRIVER_SLICE).await;

            let mut state = self.state.lock().await;
            if !state.running || !state.match_in_progress() {
                break;
            }

            let Some(current_wait) = wait else { break };
            if last_spawn.elapsed() >= current_wait {
                state.spawn_weapon_random().await;
                wait = state.roll_spawn_wait();
                last_spawn = Instant::now();
            }
        }
    }

    /// Gun game's poll loop, 100 ticks per second for the duration of one
    /// match.
    async fn run_gun_game(self: Arc<Self>) {
        loop {
            tokio::time::sleep(GUN_GAME_SLICE).await;

            let mut state = self.state.lock().await;
            if !state.running || !state.match_in_progress() {
                break;
            }
            state.gun_game_tick().await;
        }

        let mut state = self.state.lock().await;
        state.finish_gun_game().await;
    }
}

impl LobbyState {
    // ---- Queries ----------------------------------------------------------

    pub fn match_in_progress(&self) -> bool {
        self.fight_start.is_some()
    }

    fn lobby_workshop_ids(&self) -> Vec<u64> {
        self.lobby_levels
            .iter()
            .filter_map(|l| l.workshop_id())
            .collect()
    }

    pub fn current_is_lobby(&self) -> bool {
        self.current_level.is_lobby(&self.lobby_workshop_ids())
    }

    /// The starting (and maximum) health the current enum setting maps to.
    pub fn max_health(&self) -> f32 {
        match self.health {
            0 => 100.0,
            1 => 200.0,
            2 => 300.0,
            3 => 1.0,
            4 => 25.0,
            5 => 50.0,
            6 => 75.0,
            _ => 0.0,
        }
    }

    pub fn player_count(&self, exclude_self: bool) -> usize {
        let count: usize = self.clients.iter().map(Client::player_count).sum();
        if exclude_self {
            count.saturating_sub(1)
        } else {
            count
        }
    }

    fn players_too_many(&self, players_to_add: usize, exclude_self: bool) -> bool {
        !self.running || self.player_count(exclude_self) + players_to_add > self.max_players
    }

    /// Locates a player by its lobby-wide index.
    pub fn find_player(&self, index: usize) -> Option<(usize, usize)> {
        for (client_index, client) in self.clients.iter().enumerate() {
            for (slot, player) in client.players.iter().enumerate() {
                if player.index == index {
                    return Some((client_index, slot));
                }
            }
        }
        None
    }

    fn client_index_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.clients.iter().position(|c| c.addr == addr)
    }

    fn client_index_by_steam_id(&self, steam_id: u64) -> Option<usize> {
        self.clients.iter().position(|c| c.steam_id == steam_id)
    }

    /// The first free lobby-wide player index, via a bitset of used ones.
    fn next_player_index(&self) -> Option<usize> {
        if self.players_too_many(1, true) {
            return None;
        }
        let mut used = vec![false; self.max_players];
        for client in &self.clients {
            for player in &client.players {
                if player.index < used.len() {
                    used[player.index] = true;
                }
            }
        }
        used.iter().position(|in_use| !in_use)
    }

    pub fn is_invited(&self, steam_id: u64) -> bool {
        if !self.running {
            return false;
        }
        // Public lobbies take everyone; the very first client is always
        // accepted and becomes the owner.
        if self.public || self.player_count(false) == 0 {
            return true;
        }
        self.invited.contains(&steam_id)
    }

    pub fn is_owner(&self, steam_id: u64) -> bool {
        self.running && self.owner == steam_id
    }

    /// The first player blocking a match start, skipping paused clients.
    fn first_unready_player(&self) -> Option<usize> {
        for client in &self.clients {
            if client.paused {
                continue;
            }
            for player in &client.players {
                if !player.ready {
                    return Some(player.index);
                }
            }
        }
        None
    }

    fn sync_mirror(&self) {
        self.mirror.sync(
            self.running,
            self.player_count(false),
            self.clients.iter().map(|c| c.addr).collect(),
        );
    }

    // ---- Spawn-id allocators ----------------------------------------------

    /// Reserves the next free weapon spawn id. `begin_from_end: false`
    /// allocates densely downward from 65534; `true` allocates densely
    /// upward from the current map size. The placeholder insert reserves
    /// the id before the caller fills it in.
    pub fn next_weapon_spawn_id(&mut self, begin_from_end: bool) -> u16 {
        if !self.running {
            return 0;
        }
        let mut id: u16 = if begin_from_end {
            self.spawned_weapons.len() as u16
        } else {
            65534
        };
        while self.spawned_weapons.contains_key(&id) {
            if begin_from_end {
                id = id.wrapping_add(1);
            } else {
                id = id.wrapping_sub(1);
            }
        }
        self.spawned_weapons.insert(id, SyncableWeapon::default());
        id
    }

    /// As [`Self::next_weapon_spawn_id`], over the object namespace.
    pub fn next_object_spawn_id(&mut self, begin_from_end: bool) -> u16 {
        if !self.running {
            return 0;
        }
        let mut id: u16 = if begin_from_end {
            self.spawned_objects.len() as u16
        } else {
            65534
        };
        while self.spawned_objects.contains_key(&id) {
            if begin_from_end {
                id = id.wrapping_add(1);
            } else {
                id = id.wrapping_sub(1);
            }
        }
        self.spawned_objects.insert(id, SyncableObject::default());
        id
    }

    // ---- Sending ----------------------------------------------------------

    pub async fn send(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.shared.socket.send_to(&packet.to_datagram(), addr).await {
            error!("Failed to send to {addr}: {e}");
        } else if packet.should_log(self.shared.config.log_player_update) {
            trace!("Sent to {addr}: {packet}");
        }
    }

    /// Fans a packet out to every client, except `ignore_addr` if given.
    /// Runs under the lobby mutex by construction, so no other mutation can
    /// interleave between two recipients of the same broadcast.
    pub async fn broadcast(&self, packet: &Packet, ignore_addr: Option<SocketAddr>) {
        if !self.running {
            return;
        }
        for client in &self.clients {
            if Some(client.addr) == ignore_addr {
                continue;
            }
            self.send(packet, client.addr).await;
        }
        if packet.should_log(self.shared.config.log_player_update) {
            trace!("Broadcasted packet: {packet}");
        }
    }

    // ---- Dispatch ---------------------------------------------------------

    /// Routes one lobby-bound packet. Returns whether a match start should
    /// be attempted once the mutex is released.
    async fn dispatch(&mut self, packet: &mut Packet) -> Result<bool, CodecError> {
        let src = packet.src;
        match packet.kind {
            PacketType::Ping => {
                if packet.steam_id != 0 {
                    self.relay_ping(packet).await;
                } else if let Some(src) = src {
                    let mut pong = packet.clone();
                    pong.kind = PacketType::PingResponse;
                    self.send(&pong, src).await;
                }
            }

            PacketType::PingResponse => {
                if packet.steam_id != 0 {
                    self.relay_ping(packet).await;
                }
            }

            PacketType::ClientRequestingToSpawn => self.client_requesting_to_spawn(packet).await?,

            PacketType::LobbyType => self.lobby_type(packet).await?,

            PacketType::ClientReadyUp => return self.ready_up(packet).await,

            PacketType::StartMatch => return Ok(true),

            PacketType::KickPlayer | PacketType::ClientLeft => {
                if let Some(src) = src {
                    if let Some(index) = self.client_index_by_addr(src) {
                        let steam_id = self.clients[index].steam_id;
                        self.kick_client_by_steam_id(steam_id).await;
                    }
                }
            }

            PacketType::PlayerTalked => return self.player_talked(packet).await,

            PacketType::PlayerUpdate => self.player_update(packet).await?,

            PacketType::PlayerTookDamage => self.player_took_damage(packet).await?,

            PacketType::PlayerFallOut => self.player_fall_out(packet).await,

            PacketType::PlayerForceAdded
            | PacketType::PlayerForceAddedAndBlock
            | PacketType::PlayerLavaForceAdded => {
                self.broadcast(packet, src).await;
            }

            PacketType::ClientRequestingWeaponDrop => self.weapon_drop(packet).await,

            PacketType::ClientRequestingWeaponThrow => self.weapon_throw(packet).await,

            PacketType::ClientRequestingWeaponPickUp => self.weapon_pick_up(packet).await?,

            _ => error!("Unhandled packet from {:?}: {packet}", src),
        }
        Ok(false)
    }

    /// Forwards a ping between two clients, stamping in the sender's id so
    /// the receiver knows who to answer.
    async fn relay_ping(&self, packet: &Packet) {
        let Some(src) = packet.src else { return };
        let Some(source_index) = self.client_index_by_addr(src) else {
            return;
        };
        let Some(target_index) = self.client_index_by_steam_id(packet.steam_id) else {
            return;
        };
        let mut forwarded = packet.clone();
        forwarded.steam_id = self.clients[source_index].steam_id;
        let target_addr = self.clients[target_index].addr;
        self.send(&forwarded, target_addr).await;
    }

    // ---- Join / leave -----------------------------------------------------

    /// Validates and admits a joining client, then sends it the full
    /// `client-init` picture of the lobby.
    pub async fn client_init(&mut self, packet: &mut Packet) -> Result<(), JoinError> {
        if !self.running {
            return Err(JoinError::NotRunning);
        }
        let src = packet.src.ok_or(JoinError::NoSource)?;

        packet.payload.seek(0, false)?;
        let steam_id = packet.payload.read_u64_next()?;

        // A rejoining id replaces its old session.
        self.kick_client_by_steam_id(steam_id).await;

        if !self.is_invited(steam_id) {
            return Err(JoinError::NotInvited);
        }

        let local_players = packet.payload.read_u8_next()? as usize;
        if self.players_too_many(local_players, false) {
            return Err(JoinError::LobbyFull);
        }
        if local_players != 1 {
            return Err(JoinError::MultiLocalUnsupported);
        }

        let protocol_version = packet.payload.read_u8_next()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(JoinError::WrongProtocol(protocol_version));
        }

        let Some(player_index) = self.client_add(src, steam_id).await else {
            return Err(JoinError::LobbyFull);
        };

        // The join snapshot: accept byte, assigned index, lobby shape, the
        // current level, every occupied slot's identity and stats, then the
        // trailing config bytes.
        let mut init = Packet::new(PacketType::ClientInit, 0, 0);
        init.payload.write_u8_next(1);
        init.payload.write_u8_next(player_index as u8);
        init.payload.write_u8_next(self.max_players as u8);
        init.payload.write_u8_next(self.current_level.wire_type());
        init.payload.write_i32_next(self.current_level.wire_size());
        init.payload.write_bytes_next(&self.current_level.wire_data());

        for slot in 0..self.max_players {
            match self.find_player(slot) {
                Some((client_index, slot_index)) => {
                    let client = &self.clients[client_index];
                    init.payload.write_u64_next(client.steam_id);
                    if client.steam_id != 0 && client.addr != src {
                        let stats = client.players[slot_index].stats;
                        init.payload.write_i32s_next(&stats.as_wire());
                    }
                }
                None => init.payload.write_u64_next(0),
            }
        }

        init.payload.write_u16_next(0); // no weapons to pre-spawn here
        init.payload.write_bytes_next(&[
            0, // map count; the client's options holder accepts zero
            self.health,
            self.regen,
            2, // fixed spawn-rate enum: clients never spawn weapons themselves
        ]);

        self.send(&init, src).await;
        info!("Initialized client {src} for {local_players} players");

        self.workshop_maps_loaded(Some(src)).await;
        Ok(())
    }

    /// Registers the client and announces its player to everyone else.
    /// Returns the assigned player index.
    async fn client_add(&mut self, addr: SocketAddr, steam_id: u64) -> Option<usize> {
        let player_index = self.next_player_index()?;

        if self.clients.is_empty() {
            self.owner = steam_id;
            self.send(&Packet::new(PacketType::RequestingOptions, 0, 0), addr)
                .await;
        }

        let mut client = Client::new(addr, steam_id);
        client
            .players
            .push(crate::player::Player::new(player_index, self.max_health()));
        self.clients.push(client);
        self.sync_mirror();

        let mut joined = Packet::new(PacketType::ClientJoined, 0, 0);
        joined.payload.write_u8_next(player_index as u8);
        joined.payload.write_u64_next(steam_id);
        self.broadcast(&joined, Some(addr)).await;
        info!("Client {steam_id} joined the lobby as player {player_index}!");

        Some(player_index)
    }

    /// Removes every client with a matching id.
    pub async fn kick_client_by_steam_id(&mut self, steam_id: u64) {
        if !self.running {
            return;
        }
        while let Some(index) = self.client_index_by_steam_id(steam_id) {
            self.client_remove(index).await;
        }
    }

    /// Drops a client, hands ownership on, and closes the lobby if it was
    /// the last one.
    async fn client_remove(&mut self, client_index: usize) {
        if client_index >= self.clients.len() {
            return;
        }
        let removed = self.clients.remove(client_index);
        self.sync_mirror();

        if self.clients.is_empty() {
            self.close();
            return;
        }

        let left = Packet::new(PacketType::ClientLeft, 0, removed.steam_id);
        self.broadcast(&left, None).await;
        info!("Client {} left the lobby!", removed.steam_id);

        if self.owner == removed.steam_id {
            self.owner = self.clients.first().map(|c| c.steam_id).unwrap_or(0);
            info!("New lobby owner: {}", self.owner);
        }
    }

    fn close(&mut self) {
        self.running = false;
        self.fight_start = None;
        self.completed_since_stats = 0;
        self.clients.clear();
        self.spawned_weapons.clear();
        self.spawned_objects.clear();
        self.sync_mirror();
    }

    /// Sends the workshop ids in the rotation and lobby allow-list, to one
    /// client or to everyone.
    pub async fn workshop_maps_loaded(&self, addr: Option<SocketAddr>) {
        let workshop_maps: Vec<u64> = self
            .levels
            .iter()
            .chain(self.lobby_levels.iter())
            .filter_map(|l| l.workshop_id())
            .collect();
        if workshop_maps.is_empty() {
            return;
        }

        let mut packet = Packet::new(PacketType::WorkshopMapsLoaded, 1, 0);
        packet.payload.write_u16_next(workshop_maps.len() as u16);
        packet.payload.write_u64s_next(&workshop_maps);

        match addr {
            Some(addr) => self.send(&packet, addr).await,
            None => self.broadcast(&packet, None).await,
        }
    }

    // ---- Ready / spawn ----------------------------------------------------

    /// Marks the listed player indices ready, unless their client paused.
    /// Mid-match joiners just get told the match already started.
    async fn ready_up(&mut self, packet: &mut Packet) -> Result<bool, CodecError> {
        let listed = packet.payload.read_u8_next()? as usize;
        for _ in 0..listed {
            let index = packet.payload.read_u8_next()? as usize;
            if let Some((client_index, slot)) = self.find_player(index) {
                if !self.clients[client_index].paused {
                    self.clients[client_index].players[slot].set_ready(true);
                }
            }
        }

        if self.match_in_progress() {
            if let Some(src) = packet.src {
                self.send(&Packet::new(PacketType::StartMatch, 0, 0), src).await;
            }
            Ok(false)
        } else {
            Ok(true)
        }
    }

    async fn client_requesting_to_spawn(&mut self, packet: &mut Packet) -> Result<(), CodecError> {
        let index = packet.payload.read_u8_next()? as usize;
        let Some((client_index, _)) = self.find_player(index) else {
            error!("Unable to spawn invalid player {index}");
            return Ok(());
        };
        if Some(self.clients[client_index].addr) != packet.src {
            error!(
                "Client {:?} is trying to spawn player {index} owned by {}",
                packet.src, self.clients[client_index].addr
            );
            return Ok(());
        }

        let pos_x = packet.payload.read_f32_next()?;
        let pos_y = packet.payload.read_f32_next()?;
        // Newer clients pad the position and rotation out to three axes.
        let (rot_x, rot_y) = if packet.payload.remaining() >= 16 {
            packet.payload.seek(4, true)?;
            (
                packet.payload.read_f32_next()?,
                packet.payload.read_f32_next()?,
            )
        } else {
            (
                packet.payload.read_f32_next()?,
                packet.payload.read_f32_next()?,
            )
        };

        self.spawn_player(index, pos_x, pos_y, rot_x, rot_y).await;
        Ok(())
    }

    /// Announces a player spawn. A late spawn into a fight that already has
    /// more than one live player comes up dead.
    pub async fn spawn_player(&mut self, index: usize, pos_x: f32, pos_y: f32, rot_x: f32, rot_y: f32) {
        if !self.running {
            return;
        }
        let Some((client_index, slot)) = self.find_player(index) else {
            error!("Unknown player {index}");
            return;
        };
        if self.clients[client_index].players[slot].spawned {
            warn!("Ignoring spawn request for already spawned player {index}");
            return;
        }

        let flag: u8 = if !self.current_is_lobby() && self.player_count(true) > 1 {
            1 // forced die
        } else {
            0 // revive for the new map
        };

        let mut packet = Packet::new(PacketType::ClientSpawned, 0, 0);
        packet.payload.write_u8_next(index as u8);
        packet
            .payload
            .write_f32s_next(&[pos_x, pos_y, 0.0, rot_x, rot_y, 0.0]);
        packet.payload.write_u8_next(flag);

        self.clients[client_index].players[slot].spawned = true;

        self.broadcast(&packet, None).await;
        info!(
            "Spawned player {index} at {{X:{pos_x},Y:{pos_y}}} with rotation {{X:{rot_x},Y:{rot_y}}} using flag {flag}"
        );
    }

    // ---- Gameplay traffic -------------------------------------------------

    /// Relays a positional update and records it as the player's latest
    /// known state.
    async fn player_update(&mut self, packet: &mut Packet) -> Result<(), CodecError> {
        if !self.current_is_lobby() && !self.match_in_progress() {
            return Ok(());
        }
        let Some(src) = packet.src else { return Ok(()) };
        if self.client_index_by_addr(src).is_none() {
            return Ok(());
        }

        let Some(index) = player_index_from_update_channel(packet.channel) else {
            return Ok(());
        };
        if index >= self.max_players {
            return Ok(());
        }
        let Some((client_index, slot)) = self.find_player(index) else {
            return Ok(());
        };

        // Relay before decoding; the other clients can cope with anything
        // this one sent.
        self.broadcast(packet, Some(src)).await;

        let position = NetworkPosition {
            position: Vector2::new(
                packet.payload.read_i16_next()? as f32,
                packet.payload.read_i16_next()? as f32,
            ),
            rotation: Vector2::new(
                packet.payload.read_u8_next()? as f32,
                packet.payload.read_u8_next()? as f32,
            ),
            y_value: packet.payload.read_u8_next()?,
            movement: MovementType(packet.payload.read_u8_next()?),
        };

        let fight_state = FightState(packet.payload.read_u8_next()?);
        let projectile_count = packet.payload.read_u16_next()? as usize;
        let stored = projectile_count.min(MAX_PROJECTILES);
        let mut projectiles = Vec::with_capacity(stored);
        for _ in 0..stored {
            projectiles.push(Projectile {
                shoot_position: Vector2::new(
                    packet.payload.read_i16_next()? as f32,
                    packet.payload.read_i16_next()? as f32,
                ),
                shoot: Vector2::new(
                    packet.payload.read_u8_next()? as f32,
                    packet.payload.read_u8_next()? as f32,
                ),
                sync_index: packet.payload.read_u16_next()?,
            });
        }
        if projectile_count > MAX_PROJECTILES {
            // Skip the overflow so the trailing weapon byte reads correctly.
            packet
                .payload
                .seek(((projectile_count - MAX_PROJECTILES) * 8) as i64, true)?;
        }
        let weapon = Weapon(packet.payload.read_u8_next()?);

        let player = &mut self.clients[client_index].players[slot];
        player.position = position;
        player.weapon = NetworkWeapon {
            fight_state,
            weapon,
            projectiles,
        };

        if self.shared.config.log_player_update {
            let player = &self.clients[client_index].players[slot];
            debug!(
                "Player {index}: Position({:?}) Rotation({:?}) YValue:{} Fight:{:?} Weapon:{}",
                player.position.position,
                player.position.rotation,
                player.position.y_value,
                player.weapon.fight_state,
                player.weapon.weapon,
            );
        }
        Ok(())
    }

    /// Applies a client's damage claim: sanity checks, health bookkeeping,
    /// kill/death counters for the 666.666 killing blow, then winner
    /// detection.
    async fn player_took_damage(&mut self, packet: &mut Packet) -> Result<(), CodecError> {
        if !self.current_is_lobby() && !self.match_in_progress() {
            return Ok(());
        }
        let Some(src) = packet.src else { return Ok(()) };
        if self.client_index_by_addr(src).is_none() {
            return Ok(());
        }

        let Some(victim_index) = player_index_from_event_channel(packet.channel) else {
            return Ok(());
        };
        if victim_index >= self.max_players {
            return Ok(());
        }
        let Some((victim_client, victim_slot)) = self.find_player(victim_index) else {
            return Ok(());
        };

        let attacker_index = packet.payload.read_u8_next()? as usize;
        let Some((attacker_client, attacker_slot)) = self.find_player(attacker_index) else {
            return Ok(());
        };
        if self.clients[attacker_client].players[attacker_slot].is_dead() {
            warn!("Player {victim_index} took damage from already dead player {attacker_index}!");
            return Ok(());
        }

        let damage = packet.payload.read_f32_next()?;
        if packet.payload.read_u8_next()? == 1 {
            // Particle direction; decoded only to keep the cursor honest.
            let _ = packet.payload.read_f32_next()?;
            let _ = packet.payload.read_f32_next()?;
        }
        let damage_type = if packet.payload.remaining() > 0 {
            DamageType(packet.payload.read_u8_next()?)
        } else {
            DamageType::default()
        };

        if self.clients[victim_client].players[victim_slot].is_dead() {
            // Glitchy but harmless; accept the claim like the clients do.
            warn!("Player {victim_index} took damage despite being dead!");
        }
        if !self.clients[victim_client].players[victim_slot].ready && !self.current_is_lobby() {
            warn!("Player {victim_index} took damage despite not being ready!");
            return Ok(());
        }
        if attacker_index == victim_index {
            warn!("Player {victim_index} reported damage from themselves");
        }

        if damage_type == DamageType::PUNCH && attacker_index != victim_index {
            self.clients[attacker_client].players[attacker_slot]
                .stats
                .punches_landed += 1;
        }

        {
            let victim = &mut self.clients[victim_client].players[victim_slot];
            victim.last_attacker_index = attacker_index;
            victim.last_damage_type = damage_type;
        }

        if damage == KILLING_BLOW {
            info!(
                "Player {victim_index} took a killing blow from player {attacker_index} of type {damage_type}"
            );
            {
                let victim = &mut self.clients[victim_client].players[victim_slot];
                victim.health = 0.0;
                victim.stats.deaths += 1;
            }
            if attacker_index != victim_index {
                self.clients[attacker_client].players[attacker_slot].stats.kills += 1;
            }
            self.broadcast(packet, Some(src)).await;
            self.check_winner().await;
            return Ok(());
        }

        info!(
            "Player {victim_index} took {damage} damage from player {attacker_index} of type {damage_type}"
        );
        self.clients[victim_client].players[victim_slot].health -= damage;
        self.broadcast(packet, Some(src)).await;

        if self.clients[victim_client].players[victim_slot].is_dead() {
            self.check_winner().await;
        }
        Ok(())
    }

    /// A player fell off the map.
    async fn player_fall_out(&mut self, packet: &mut Packet) {
        if !self.current_is_lobby() && !self.match_in_progress() {
            return;
        }

        let Some(index) = player_index_from_event_channel(packet.channel) else {
            return;
        };
        if index >= self.max_players {
            return;
        }
        let Some((client_index, slot)) = self.find_player(index) else {
            return;
        };

        // With a single player there is no fight to win; just rotate maps.
        if self.player_count(false) == 1 {
            self.change_map(-1, NO_WINNER).await;
            return;
        }

        {
            let player = &mut self.clients[client_index].players[slot];
            player.health = 0.0;
            player.stats.deaths += 1;
            player.stats.falls += 1;
        }

        self.broadcast(packet, packet.src).await;
        self.check_winner().await;
    }

    /// Relays chat, applies the word filter, and hands `/` messages to the
    /// command shell. Returns whether a match start should be attempted.
    async fn player_talked(&mut self, packet: &mut Packet) -> Result<bool, CodecError> {
        let Some(index) = player_index_from_event_channel(packet.channel) else {
            return Ok(false);
        };
        if index >= self.max_players {
            return Ok(false);
        }
        let Some((client_index, slot)) = self.find_player(index) else {
            return Ok(false);
        };

        let message = String::from_utf8_lossy(packet.payload.bytes()).to_string();
        if message.is_empty() {
            return Ok(false);
        }
        if self.shared.filter.check(&message) {
            self.player_thought(index, "No swearing!").await;
            return Ok(false);
        }

        self.broadcast(packet, packet.src).await;

        let steam_id = self.clients[client_index].steam_id;
        trace!(
            "[CHAT:{steam_id}] {}: {message}",
            self.shared.usernames.display(steam_id)
        );

        if message.starts_with('/') {
            return Ok(commands::handle(self, client_index, slot, index, packet.timestamp, &message)
                .await);
        }
        Ok(false)
    }

    /// Spoofs a chat line from a player, heard by everyone.
    pub async fn player_said(&self, index: usize, message: &str) {
        let Some((client_index, slot)) = self.find_player(index) else {
            return;
        };
        let channel = self.clients[client_index].players[slot].channel_event();
        let steam_id = self.clients[client_index].steam_id;

        let mut packet = Packet::new(PacketType::PlayerTalked, channel, steam_id);
        packet.payload.write_bytes_next(message.as_bytes());
        self.broadcast(&packet, None).await;

        trace!(
            "#[CHAT:{steam_id}] {}: {message}",
            self.shared.usernames.display(steam_id)
        );
    }

    /// Spoofs a chat line only the player themselves can hear.
    pub async fn player_thought(&self, index: usize, message: &str) {
        let Some((client_index, slot)) = self.find_player(index) else {
            return;
        };
        let channel = self.clients[client_index].players[slot].channel_event();
        let steam_id = self.clients[client_index].steam_id;
        let addr = self.clients[client_index].addr;

        let mut packet = Packet::new(PacketType::PlayerTalked, channel, steam_id);
        packet.payload.write_bytes_next(message.as_bytes());
        self.send(&packet, addr).await;
    }

    async fn lobby_type(&mut self, packet: &mut Packet) -> Result<(), CodecError> {
        let Some(src) = packet.src else { return Ok(()) };
        let Some(client_index) = self.client_index_by_addr(src) else {
            return Ok(());
        };
        let player_index = self.clients[client_index].players[0].index;
        let steam_id = self.clients[client_index].steam_id;

        if !self.is_owner(steam_id) {
            self.player_said(player_index, "No permissions!").await;
            return Ok(());
        }

        match packet.payload.read_u8_next()? {
            1 => {
                self.public = false;
                self.player_said(player_index, "Set lobby to private!").await;
            }
            2 => {
                self.public = true;
                self.player_said(player_index, "Set lobby to public!").await;
            }
            flag => {
                self.player_said(player_index, &format!("Unhandled lobby type {flag}!"))
                    .await;
            }
        }
        Ok(())
    }

    // ---- Weapons ----------------------------------------------------------

    /// Rewrites a drop request into a `weapon-dropped` broadcast with fresh
    /// spawn ids appended.
    async fn weapon_drop(&mut self, packet: &mut Packet) {
        let weapon_spawn_id = self.next_weapon_spawn_id(false);
        let object_spawn_id = self.next_object_spawn_id(false);

        let mut dropped = packet.clone();
        dropped.kind = PacketType::WeaponDropped;
        let end = dropped.payload.capacity();
        dropped.payload.write_u16_at(end, weapon_spawn_id);
        dropped.payload.write_u16_at(end + 2, object_spawn_id);

        info!(
            "Weapon {} was dropped!",
            dropped.payload.read_u8_at(0).unwrap_or(0)
        );
        self.broadcast(&dropped, None).await;
    }

    /// As [`Self::weapon_drop`], for throws. The thrower's stat counter
    /// moves too.
    async fn weapon_throw(&mut self, packet: &mut Packet) {
        let weapon_spawn_id = self.next_weapon_spawn_id(false);
        let object_spawn_id = self.next_object_spawn_id(false);

        let mut thrown = packet.clone();
        thrown.kind = PacketType::WeaponThrown;
        let end = thrown.payload.capacity();
        thrown.payload.write_u16_at(end, weapon_spawn_id);
        thrown.payload.write_u16_at(end + 2, object_spawn_id);

        if let Some(index) = player_index_from_update_channel(packet.channel) {
            if let Some((client_index, slot)) = self.find_player(index) {
                self.clients[client_index].players[slot].stats.weapons_thrown += 1;
            }
        }

        info!(
            "Weapon {} was thrown!",
            thrown.payload.read_u8_at(0).unwrap_or(0)
        );
        self.broadcast(&thrown, None).await;
    }

    /// Confirms a pick-up if the weapon id is actually live on the map.
    async fn weapon_pick_up(&mut self, packet: &mut Packet) -> Result<(), CodecError> {
        let player_index = packet.payload.read_u8_next()? as usize;
        let weapon_spawn_id = packet.payload.read_u16_next()?;

        if !self.spawned_weapons.contains_key(&weapon_spawn_id) {
            error!("Player {player_index} tried to pick up invalid weapon {weapon_spawn_id}!");
            return Ok(());
        }

        if let Some((client_index, slot)) = self.find_player(player_index) {
            self.clients[client_index].players[slot].stats.weapons_picked_up += 1;
        }

        let mut picked_up = packet.clone();
        picked_up.kind = PacketType::WeaponWasPickedUp;
        info!("Player {player_index} picked up weapon {weapon_spawn_id}!");
        self.broadcast(&picked_up, None).await;
        Ok(())
    }

    /// Spawns one weapon at a position, allocating its two spawn ids.
    pub async fn spawn_weapon(&mut self, weapon: Weapon, position: Vector3) {
        if !self.running || !self.match_in_progress() {
            return;
        }

        let weapon_spawn_id = self.next_weapon_spawn_id(false);
        let object_spawn_id = self.next_object_spawn_id(false);

        let mut packet = Packet::new(PacketType::WeaponSpawned, 0, 0);
        packet.payload.write_u8_next(weapon.0);
        packet.payload.write_u8_next(position.y as i32 as u8);
        packet.payload.write_u8_next(position.z as i32 as u8);
        packet.payload.write_u16_next(weapon_spawn_id);
        packet.payload.write_u16_next(object_spawn_id);
        if let Some(scene) = self.current_level.scene_index() {
            if (104..=124).contains(&scene) {
                packet.payload.write_u8_next(1);
            }
        }

        self.broadcast(&packet, None).await;
        info!("Spawned weapon {weapon} at {position:?}");
    }

    /// Spawns a random handful of weapons from the active pool, alternating
    /// sides of the map.
    pub async fn spawn_weapon_random(&mut self) {
        if !self.running || !self.match_in_progress() {
            return;
        }

        let pool = if self.tourney_rules {
            TOURNEY_POOL
        } else {
            self.game_mode.weapons()
        };
        if pool.is_empty() {
            return;
        }

        let count = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..self.player_count(false) + 1)
        };

        for _ in 0..count {
            let (weapon, x) = {
                let mut rng = rand::thread_rng();
                let weapon = pool[rng.gen_range(0..pool.len())];
                let range = if self.tourney_rules { 2 } else { 8 };
                (weapon, rng.gen_range(0..range) as f32)
            };

            let height = 11.0 * self.last_applied_scale;
            let x = if self.last_spawned_weapon_on_left { -x } else { x };
            self.last_spawned_weapon_on_left = !self.last_spawned_weapon_on_left;

            self.spawn_weapon(weapon, Vector3::new(0.0, height, x)).await;
        }
    }

    /// Rolls the wait before the next weapon drop, or `None` when spawning
    /// is disabled.
    pub fn roll_spawn_wait(&self) -> Option<Duration> {
        let (min, max) = if self.tourney_rules {
            (3, 5)
        } else {
            (self.weapon_spawn_rate_min, self.weapon_spawn_rate_max)
        };
        if min == 0 && max == 0 {
            return None;
        }
        let seconds = if max > min {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        Some(Duration::from_secs(seconds))
    }

    // ---- Match lifecycle --------------------------------------------------

    /// Applies the map scale and announces the level's pre-placed weapons.
    pub async fn init_map(&mut self) {
        if !self.running {
            return;
        }

        let map_size = self.current_level.map_size();
        self.change_map_size(if map_size > 0.0 { map_size } else { 1.0 });
        self.ground_weapons_init().await;
    }

    fn change_map_size(&mut self, new_size: f32) {
        self.last_applied_scale = new_size / 10.0;
    }

    /// Tells every client about the level's pre-placed weapons, assigning
    /// each a dense-from-top weapon id and a dense-from-bottom object id.
    async fn ground_weapons_init(&mut self) {
        if !self.running {
            return;
        }
        let level = self.current_level.clone();
        let Some(decoded) = level.decoded() else { return };
        if decoded.placed_weapons.is_empty() {
            return;
        }

        let mut packet = Packet::new(PacketType::GroundWeaponsInit, 0, 0);
        packet
            .payload
            .write_u16_next(decoded.placed_weapons.len() as u16);
        for weapon in &decoded.placed_weapons {
            packet.payload.write_f32_next(weapon.position_x);
            packet.payload.write_f32_next(weapon.position_y);
            packet.payload.write_u16_next(self.next_weapon_spawn_id(false));
            packet.payload.write_u16_next(self.next_object_spawn_id(true));
        }

        self.broadcast(&packet, None).await;
        debug!("Initialized {} ground weapons", decoded.placed_weapons.len());
    }

    fn un_ready_all_players(&mut self) {
        let max_health = self.max_health();
        for client in &mut self.clients {
            for player in &mut client.players {
                player.ready = false;
                player.spawned = false;
                player.health = max_health;
            }
        }
    }

    /// Declares a winner (or nobody) and rotates the map if exactly one or
    /// zero players are left standing. Re-entrance is debounced.
    pub async fn check_winner(&mut self) {
        if !self.running {
            return;
        }
        if !self.current_is_lobby() && !self.match_in_progress() {
            return;
        }
        if self.checking_winner {
            return;
        }
        self.checking_winner = true;

        let survivors: Vec<usize> = self
            .clients
            .iter()
            .flat_map(|c| c.players.iter())
            .filter(|p| p.health > 0.0)
            .map(|p| p.index)
            .collect();

        match survivors.len() {
            1 => {
                info!("Player {} is the winner!", survivors[0]);
                if let Some((client_index, slot)) = self.find_player(survivors[0]) {
                    self.clients[client_index].players[slot].stats.wins += 1;
                }
                self.change_map(-1, survivors[0] as u8).await;
            }
            0 => {
                info!("No one survived!");
                self.change_map(-1, NO_WINNER).await;
            }
            _ => {}
        }

        self.checking_winner = false;
    }

    /// Ends the fight, restores every player, and broadcasts the next
    /// level. A negative or out-of-range `map_index` picks from the
    /// rotation; every 30th such pick outside tourney rules is the stats
    /// recap map.
    pub async fn change_map(&mut self, map_index: i32, winner_index: u8) {
        if !self.running {
            return;
        }
        // Debounce: once the match ended, a straggling "player X won" must
        // not fire a second map change.
        if !self.current_is_lobby() && !self.match_in_progress() && winner_index != NO_WINNER {
            return;
        }

        self.fight_start = None;
        self.un_ready_all_players();
        self.completed_since_stats += 1;

        self.current_level = if map_index < 0 || map_index as usize >= self.levels.len() {
            if !self.tourney_rules && self.completed_since_stats >= 30 {
                self.completed_since_stats = 0;
                Level::landfall(level::STATS_SCENE)
            } else {
                self.pick_rotation_level()
            }
        } else {
            self.levels[map_index as usize].clone()
        };

        self.spawned_weapons.clear();
        self.spawned_objects.clear();

        self.broadcast_map_change(winner_index).await;
        info!("Changed map: {}", self.current_level);
    }

    /// Swaps in a built-in scene immediately, outside the rotation.
    pub async fn temp_map(&mut self, scene_index: i32, winner_index: u8) {
        if !self.running {
            return;
        }

        self.fight_start = None;
        self.un_ready_all_players();
        self.current_level = Level::landfall(scene_index);
        self.spawned_weapons.clear();
        self.spawned_objects.clear();

        self.broadcast_map_change(winner_index).await;
        info!("Changed map temporarily: {}", self.current_level);
    }

    async fn broadcast_map_change(&self, winner_index: u8) {
        let mut packet = Packet::new(PacketType::MapChange, 0, 0);
        packet.payload.write_u8_next(winner_index);
        packet.payload.write_u8_next(self.current_level.wire_type());
        packet
            .payload
            .write_bytes_next(&self.current_level.wire_data());
        self.broadcast(&packet, None).await;
    }

    /// The next level from the rotation: random and never the current one,
    /// or sequential when the random cycle is off. A game mode that
    /// restricts levels overrides the lobby rotation.
    fn pick_rotation_level(&mut self) -> Arc<Level> {
        let mode_levels = self.game_mode.allowed_levels();
        let pool: &[Arc<Level>] = if mode_levels.is_empty() {
            &self.levels
        } else {
            &mode_levels
        };
        if pool.is_empty() {
            return self.current_level.clone();
        }
        if !self.random_maps {
            let position = pool
                .iter()
                .position(|l| Arc::ptr_eq(l, &self.current_level))
                .map(|i| (i + 1) % pool.len())
                .unwrap_or(0);
            return pool[position].clone();
        }

        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let candidate = pool[rng.gen_range(0..pool.len())].clone();
            if !Arc::ptr_eq(&candidate, &self.current_level) {
                return candidate;
            }
        }
        pool[rng.gen_range(0..pool.len())].clone()
    }

    // ---- Gun game ---------------------------------------------------------

    /// Resets per-player progression state at the start of a gun-game match
    /// and hands everyone their current tier weapon.
    async fn prepare_gun_game(&mut self) {
        let count = self.player_count(false);
        let mut tiers: Vec<(usize, Weapon)> = Vec::new();

        if let GameMode::GunGame(gun_game) = &mut self.game_mode {
            gun_game.done = false;
            gun_game.ensure_players(self.max_players.max(count));
            for data in &mut gun_game.players {
                data.dead = false;
            }
            for player_index in 0..gun_game.players.len() {
                tiers.push((player_index, gun_game.tier_weapon(player_index)));
            }
        } else {
            return;
        }

        for (player_index, weapon) in tiers {
            self.update_weapon(player_index, weapon);
        }
    }

    /// Replaces the server-side record of what a player is holding.
    fn update_weapon(&mut self, player_index: usize, weapon: Weapon) {
        if let Some((client_index, slot)) = self.find_player(player_index) {
            self.clients[client_index].players[slot].weapon.weapon = weapon;
        }
    }

    /// One 10 ms gun-game observation: processes fresh deaths into tier
    /// advances or demotions, and strips weapons outside the player's tier.
    pub async fn gun_game_tick(&mut self) {
        #[derive(Debug)]
        enum Action {
            SetWeapon(usize, Weapon),
            Winner(usize),
        }

        // Snapshot the facts the progression rules need before borrowing
        // the mode state mutably.
        let snapshot: Vec<(usize, f32, usize, Weapon)> = self
            .clients
            .iter()
            .flat_map(|c| c.players.iter())
            .map(|p| (p.index, p.health, p.last_attacker_index, p.weapon.weapon))
            .collect();

        let mut actions: Vec<Action> = Vec::new();

        let GameMode::GunGame(gun_game) = &mut self.game_mode else {
            return;
        };
        let highest = snapshot.iter().map(|s| s.0 + 1).max().unwrap_or(0);
        gun_game.ensure_players(highest);

        for &(index, health, attacker_index, held) in &snapshot {
            let tier = gun_game.tier_weapon(index);
            if held != Weapon::EMPTY && held != tier {
                actions.push(Action::SetWeapon(index, Weapon::EMPTY));
            }

            let already_processed = gun_game
                .players
                .get(index)
                .map(|d| d.dead)
                .unwrap_or(true);
            if already_processed || health > 0.0 {
                continue;
            }
            if let Some(data) = gun_game.players.get_mut(index) {
                data.dead = true;
            }
            trace!("[Gun Game] Player {index} died from player {attacker_index}");

            let attacker_held = snapshot
                .iter()
                .find(|s| s.0 == attacker_index)
                .map(|s| s.3)
                .unwrap_or(Weapon::EMPTY);

            if attacker_index != index && attacker_held == gun_game.tier_weapon(attacker_index) {
                if gun_game.advance(attacker_index) {
                    actions.push(Action::Winner(attacker_index));
                } else {
                    actions.push(Action::SetWeapon(
                        attacker_index,
                        gun_game.tier_weapon(attacker_index),
                    ));
                }
            } else {
                // Suicides, unknown attackers, and off-tier kills all knock
                // the victim back one step.
                gun_game.demote(index);
            }
        }

        for action in actions {
            match action {
                Action::SetWeapon(player_index, weapon) => self.update_weapon(player_index, weapon),
                Action::Winner(player_index) => {
                    trace!("[Gun Game] Player {player_index} is the gun game winner!");
                    self.player_said(player_index, "I'm the Gun Game winner!")
                        .await;
                }
            }
        }
    }

    /// Post-match gun-game cleanup; resets the table if membership changed.
    pub async fn finish_gun_game(&mut self) {
        let count = self.player_count(false);
        let mut reset = false;
        if let GameMode::GunGame(gun_game) = &mut self.game_mode {
            if gun_game.players.len() != self.max_players.max(count) {
                gun_game.players = vec![GunGamePlayerData::default(); count];
                reset = true;
            }
            gun_game.done = true;
        } else {
            return;
        }
        if reset {
            trace!("[Gun Game] Player count changed, resetting!");
            self.player_said(0, "Player count changed,\nreset Gun Game!")
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::network::Shared;
    use shared::unix_now;
    use std::collections::HashSet;

    async fn test_lobby() -> Arc<Lobby> {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Lobby::new(Shared::new(Config::default(), Arc::new(socket)))
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn ready_up_payload(indices: &[u8]) -> Vec<u8> {
        let mut bytes = vec![indices.len() as u8];
        bytes.extend_from_slice(indices);
        bytes
    }

    fn join_packet(steam_id: u64, local_players: u8, version: u8, src: SocketAddr) -> Packet {
        let mut packet = Packet::new(PacketType::ClientRequestingIndex, 0, 0);
        packet.payload.write_u64_next(steam_id);
        packet.payload.write_u8_next(local_players);
        packet.payload.write_u8_next(version);
        packet.src = Some(src);
        packet
    }

    #[tokio::test]
    async fn weapon_ids_allocate_densely_from_the_top() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        let mut seen = HashSet::new();
        for i in 0..10_000u32 {
            let id = state.next_weapon_spawn_id(false);
            assert_eq!(id as u32, 65534 - i);
            assert!(seen.insert(id), "id {id} returned twice");
        }
        assert_eq!(state.spawned_weapons.len(), 10_000);
    }

    #[tokio::test]
    async fn object_ids_allocate_densely_from_the_bottom() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        for expected in 0..32u16 {
            assert_eq!(state.next_object_spawn_id(true), expected);
        }
        // A reserved id is never handed out again.
        assert_eq!(state.spawned_objects.len(), 32);
        assert_eq!(state.next_object_spawn_id(true), 32);
    }

    #[tokio::test]
    async fn allocator_directions_share_one_namespace() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        let top = state.next_weapon_spawn_id(false);
        let bottom = state.next_weapon_spawn_id(true);
        assert_eq!(top, 65534);
        assert_eq!(bottom, 1); // len was 1 after the first reservation
        assert_ne!(top, bottom);
    }

    #[tokio::test]
    async fn health_enum_maps_to_max_health() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        let expected = [100.0, 200.0, 300.0, 1.0, 25.0, 50.0, 75.0];
        for (setting, health) in expected.iter().enumerate() {
            state.health = setting as u8;
            assert_eq!(state.max_health(), *health);
        }
        state.health = 7;
        assert_eq!(state.max_health(), 0.0);
    }

    #[tokio::test]
    async fn join_assigns_unique_indices_and_ownership() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(40001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(40002)))
            .await
            .unwrap();

        assert_eq!(state.player_count(false), 2);
        assert_eq!(state.owner, 100);

        let indices: HashSet<usize> = state
            .clients
            .iter()
            .flat_map(|c| c.players.iter().map(|p| p.index))
            .collect();
        assert_eq!(indices, HashSet::from([0, 1]));
    }

    #[tokio::test]
    async fn join_rejects_wrong_protocol_and_multi_local() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        assert!(matches!(
            state
                .client_init(&mut join_packet(100, 1, 24, addr(40003)))
                .await,
            Err(JoinError::WrongProtocol(24))
        ));
        assert!(matches!(
            state
                .client_init(&mut join_packet(100, 2, PROTOCOL_VERSION, addr(40003)))
                .await,
            Err(JoinError::MultiLocalUnsupported)
        ));
        assert_eq!(state.player_count(false), 0);
    }

    #[tokio::test]
    async fn join_rejects_when_full() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        for i in 0..4u64 {
            state
                .client_init(&mut join_packet(
                    100 + i,
                    1,
                    PROTOCOL_VERSION,
                    addr(41000 + i as u16),
                ))
                .await
                .unwrap();
        }
        assert!(matches!(
            state
                .client_init(&mut join_packet(900, 1, PROTOCOL_VERSION, addr(41999)))
                .await,
            Err(JoinError::LobbyFull)
        ));
    }

    #[tokio::test]
    async fn private_lobby_requires_invitation_after_first_client() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;
        state.public = false;

        // The first client is always accepted and becomes the owner.
        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(42001)))
            .await
            .unwrap();

        assert!(matches!(
            state
                .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(42002)))
                .await,
            Err(JoinError::NotInvited)
        ));

        state.invited.push(200);
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(42002)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejoining_steam_id_replaces_the_old_session() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(43001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(43002)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(43003)))
            .await
            .unwrap();

        assert_eq!(state.clients.len(), 2);
        assert_eq!(state.client_index_by_addr(addr(43001)), None);
        assert!(state.client_index_by_addr(addr(43003)).is_some());
    }

    #[tokio::test]
    async fn owner_transfers_to_earliest_remaining_client() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(44001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(44002)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(300, 1, PROTOCOL_VERSION, addr(44003)))
            .await
            .unwrap();

        state.kick_client_by_steam_id(100).await;
        assert_eq!(state.owner, 200);
        assert!(state.running);
    }

    #[tokio::test]
    async fn last_client_leaving_closes_the_lobby() {
        let lobby = test_lobby().await;
        {
            let mut state = lobby.state.lock().await;
            state
                .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(45001)))
                .await
                .unwrap();
            state.kick_client_by_steam_id(100).await;
            assert!(!state.running);
        }
        assert!(!lobby.is_running());
        assert_eq!(lobby.player_count(), 0);
    }

    #[tokio::test]
    async fn paused_client_ignores_auto_ready() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(46001)))
            .await
            .unwrap();
        state.clients[0].paused = true;

        let mut ready = Packet::new(PacketType::ClientReadyUp, 3, 0);
        ready.payload.write_bytes_next(&ready_up_payload(&[0]));
        ready.src = Some(addr(46001));
        let try_start = state.ready_up(&mut ready).await.unwrap();

        assert!(try_start);
        assert!(!state.clients[0].players[0].ready);

        state.clients[0].paused = false;
        ready.payload.seek(0, false).unwrap();
        state.ready_up(&mut ready).await.unwrap();
        assert!(state.clients[0].players[0].ready);
    }

    #[tokio::test]
    async fn killing_blow_updates_both_scoreboards_and_rotates_the_map() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(47001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(47002)))
            .await
            .unwrap();

        // Enter a fight on a non-lobby level.
        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());
        for client in &mut state.clients {
            client.players[0].ready = true;
        }

        // Player 0 (victim) reports a killing blow from player 1.
        let mut damage = Packet::new(PacketType::PlayerTookDamage, shared::event_channel(0), 0);
        damage.payload.write_u8_next(1); // attacker
        damage.payload.write_f32_next(KILLING_BLOW);
        damage.payload.write_u8_next(0); // no particles
        damage.payload.write_u8_next(DamageType::OTHER.0);
        damage.src = Some(addr(47001));

        state.player_took_damage(&mut damage).await.unwrap();

        let (vc, vs) = state.find_player(0).unwrap();
        let (ac, asl) = state.find_player(1).unwrap();
        assert_eq!(state.clients[vc].players[vs].stats.deaths, 1);
        assert_eq!(state.clients[ac].players[asl].stats.kills, 1);
        assert_eq!(state.clients[ac].players[asl].stats.wins, 1);

        // The winner check ended the match and restored everyone.
        assert!(!state.match_in_progress());
        assert_eq!(state.clients[vc].players[vs].health, state.max_health());
        assert!(!state.clients[vc].players[vs].ready);
        assert!(!state.clients[ac].players[asl].ready);
    }

    #[tokio::test]
    async fn accumulated_damage_ends_the_match_without_moving_kill_counters() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(48001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(48002)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());
        for client in &mut state.clients {
            client.players[0].ready = true;
        }

        let mut damage = Packet::new(PacketType::PlayerTookDamage, shared::event_channel(0), 0);
        damage.payload.write_u8_next(1);
        damage.payload.write_f32_next(150.0);
        damage.payload.write_u8_next(0);
        damage.src = Some(addr(48001));

        state.player_took_damage(&mut damage).await.unwrap();

        let (ac, asl) = state.find_player(1).unwrap();
        let (vc, vs) = state.find_player(0).unwrap();
        assert_eq!(state.clients[ac].players[asl].stats.kills, 0);
        assert_eq!(state.clients[vc].players[vs].stats.deaths, 0);
        // Health crossed zero, so the winner check still fired.
        assert!(!state.match_in_progress());
    }

    #[tokio::test]
    async fn damage_from_dead_attacker_is_rejected() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(49001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(49002)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());
        for client in &mut state.clients {
            client.players[0].ready = true;
        }
        let (ac, asl) = state.find_player(1).unwrap();
        state.clients[ac].players[asl].health = 0.0;

        let mut damage = Packet::new(PacketType::PlayerTookDamage, shared::event_channel(0), 0);
        damage.payload.write_u8_next(1);
        damage.payload.write_f32_next(50.0);
        damage.payload.write_u8_next(0);
        damage.src = Some(addr(49001));

        state.player_took_damage(&mut damage).await.unwrap();

        let (vc, vs) = state.find_player(0).unwrap();
        assert_eq!(state.clients[vc].players[vs].health, state.max_health());
    }

    #[tokio::test]
    async fn punches_are_counted_for_the_attacker() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(50001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(50002)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());
        for client in &mut state.clients {
            client.players[0].ready = true;
        }

        let mut damage = Packet::new(PacketType::PlayerTookDamage, shared::event_channel(0), 0);
        damage.payload.write_u8_next(1);
        damage.payload.write_f32_next(5.0);
        damage.payload.write_u8_next(0);
        damage.payload.write_u8_next(DamageType::PUNCH.0);
        damage.src = Some(addr(50001));

        state.player_took_damage(&mut damage).await.unwrap();

        let (ac, asl) = state.find_player(1).unwrap();
        assert_eq!(state.clients[ac].players[asl].stats.punches_landed, 1);
    }

    #[tokio::test]
    async fn fall_out_kills_and_checks_for_a_winner() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(51001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(51002)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());

        let mut fall = Packet::new(PacketType::PlayerFallOut, shared::event_channel(0), 0);
        fall.src = Some(addr(51001));
        state.player_fall_out(&mut fall).await;

        // Player 1 was the sole survivor; the fight is over.
        assert!(!state.match_in_progress());
        let (vc, vs) = state.find_player(0).unwrap();
        assert_eq!(state.clients[vc].players[vs].stats.deaths, 1);
        assert_eq!(state.clients[vc].players[vs].stats.falls, 1);
    }

    #[tokio::test]
    async fn change_map_is_debounced_after_the_match_ends() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(52001)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = None; // match already over

        let before = state.current_level.clone();
        state.change_map(-1, 2).await; // a "real" winner after the fact
        assert!(Arc::ptr_eq(&before, &state.current_level));

        // But a no-winner change (operator /map) still goes through.
        state.change_map(-1, NO_WINNER).await;
        assert!(!Arc::ptr_eq(&before, &state.current_level));
    }

    #[tokio::test]
    async fn every_thirtieth_rotation_is_the_stats_map() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(53001)))
            .await
            .unwrap();

        state.completed_since_stats = 29;
        state.change_map(-1, NO_WINNER).await;
        assert!(state.current_level.is_stats());
        assert_eq!(state.completed_since_stats, 0);
    }

    #[tokio::test]
    async fn map_change_clears_spawn_id_maps() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(54001)))
            .await
            .unwrap();

        state.next_weapon_spawn_id(false);
        state.next_object_spawn_id(true);
        assert!(!state.spawned_weapons.is_empty());

        state.change_map(-1, NO_WINNER).await;
        assert!(state.spawned_weapons.is_empty());
        assert!(state.spawned_objects.is_empty());
    }

    #[tokio::test]
    async fn stale_time_checked_packets_are_dropped() {
        let lobby = test_lobby().await;
        lobby
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(55001)))
            .await
            .unwrap();

        // Accept a fresh time-checked packet to advance the lobby clock.
        let fresh_timestamp = unix_now() + 100;
        let mut fresh = Packet::new(PacketType::KickPlayer, 0, 0);
        fresh.timestamp = fresh_timestamp;
        fresh.src = Some(addr(55999)); // unknown addr: kick is a no-op
        lobby.handle(fresh).await;

        {
            let state = lobby.state.lock().await;
            assert_eq!(state.last_timestamp, fresh_timestamp);
        }

        // An older ready-up is exempt from the gate and still lands.
        let mut ready = Packet::new(PacketType::ClientReadyUp, 3, 0);
        ready.timestamp = 1;
        ready.payload.write_bytes_next(&ready_up_payload(&[0]));
        ready.src = Some(addr(55001));
        lobby.handle(ready).await;
        {
            let state = lobby.state.lock().await;
            assert!(state.clients[0].players[0].ready);
            // Exempt opcodes never move the lobby clock.
            assert_eq!(state.last_timestamp, fresh_timestamp);
        }

        // A stale kick (time-checked) from the real client is dropped.
        let mut kick = Packet::new(PacketType::KickPlayer, 0, 0);
        kick.timestamp = 1;
        kick.src = Some(addr(55001));
        lobby.handle(kick).await;
        {
            let state = lobby.state.lock().await;
            assert_eq!(state.clients.len(), 1, "stale kick must be ignored");
        }
    }

    #[tokio::test]
    async fn spawn_request_for_someone_elses_player_is_rejected() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(56001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(56002)))
            .await
            .unwrap();

        let mut spawn = Packet::new(PacketType::ClientRequestingToSpawn, 0, 0);
        spawn.payload.write_u8_next(0); // player 0 belongs to client 100
        spawn.payload.write_f32s_next(&[1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        spawn.src = Some(addr(56002)); // but client 200 asks

        state.client_requesting_to_spawn(&mut spawn).await.unwrap();
        let (vc, vs) = state.find_player(0).unwrap();
        assert!(!state.clients[vc].players[vs].spawned);
    }

    #[tokio::test]
    async fn second_spawn_request_is_ignored() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(57001)))
            .await
            .unwrap();

        state.spawn_player(0, 1.0, 2.0, 0.0, 0.0).await;
        let (vc, vs) = state.find_player(0).unwrap();
        assert!(state.clients[vc].players[vs].spawned);

        // The flag survives a repeat request untouched.
        state.spawn_player(0, 9.0, 9.0, 0.0, 0.0).await;
        assert!(state.clients[vc].players[vs].spawned);
    }

    #[tokio::test]
    async fn pick_up_of_unknown_weapon_id_is_refused() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(58001)))
            .await
            .unwrap();

        let mut pick_up = Packet::new(PacketType::ClientRequestingWeaponPickUp, 2, 0);
        pick_up.payload.write_u8_next(0);
        pick_up.payload.write_u16_next(1234); // never allocated
        pick_up.src = Some(addr(58001));

        state.weapon_pick_up(&mut pick_up).await.unwrap();
        let (vc, vs) = state.find_player(0).unwrap();
        assert_eq!(state.clients[vc].players[vs].stats.weapons_picked_up, 0);
    }

    #[tokio::test]
    async fn roll_spawn_wait_respects_rates_and_tourney_rules() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        for _ in 0..64 {
            let wait = state.roll_spawn_wait().unwrap().as_secs();
            assert!((5..8).contains(&wait), "stock wait {wait} out of [5,8)");
        }

        state.tourney_rules = true;
        for _ in 0..64 {
            let wait = state.roll_spawn_wait().unwrap().as_secs();
            assert!((3..5).contains(&wait), "tourney wait {wait} out of [3,5)");
        }

        state.tourney_rules = false;
        state.weapon_spawn_rate_min = 0;
        state.weapon_spawn_rate_max = 0;
        assert!(state.roll_spawn_wait().is_none());
    }

    #[tokio::test]
    async fn player_update_is_recorded_and_overflow_is_skipped() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(59001)))
            .await
            .unwrap();

        let mut update = Packet::new(PacketType::PlayerUpdate, shared::update_channel(0), 0);
        update.payload.write_i16_next(12);
        update.payload.write_i16_next(-7);
        update.payload.write_u8_next(3);
        update.payload.write_u8_next(4);
        update.payload.write_u8_next(100); // y value
        update.payload.write_u8_next(1); // movement
        update.payload.write_u8_next(2); // fight state
        update.payload.write_u16_next(300); // projectiles, past the cap
        for i in 0..300u16 {
            update.payload.write_i16_next(i as i16);
            update.payload.write_i16_next(0);
            update.payload.write_u8_next(0);
            update.payload.write_u8_next(0);
            update.payload.write_u16_next(i);
        }
        update.payload.write_u8_next(Weapon::SNIPER.0);
        update.src = Some(addr(59001));

        state.player_update(&mut update).await.unwrap();

        let (vc, vs) = state.find_player(0).unwrap();
        let player = &state.clients[vc].players[vs];
        assert_eq!(player.position.position, Vector2::new(12.0, -7.0));
        assert_eq!(player.position.y_value, 100);
        assert_eq!(player.weapon.projectiles.len(), MAX_PROJECTILES);
        // The trailing weapon byte still decoded correctly past the overflow.
        assert_eq!(player.weapon.weapon, Weapon::SNIPER);
    }

    #[tokio::test]
    async fn gun_game_tier_kills_climb_to_a_win() {
        use shared::weapons::GUN_GAME_PROGRESSION;

        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;
        state.game_mode = GameMode::GunGame(Default::default());

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(60001)))
            .await
            .unwrap();
        state
            .client_init(&mut join_packet(200, 1, PROTOCOL_VERSION, addr(60002)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());
        state.prepare_gun_game().await;

        for _tier in 0..GUN_GAME_PROGRESSION.len() {
            // The attacker (player 1) holds exactly their tier weapon and
            // kills player 0.
            let tier_weapon = match &state.game_mode {
                GameMode::GunGame(gg) => gg.tier_weapon(1),
                _ => unreachable!(),
            };
            {
                let (ac, asl) = state.find_player(1).unwrap();
                state.clients[ac].players[asl].weapon.weapon = tier_weapon;
                let (vc, vs) = state.find_player(0).unwrap();
                let victim = &mut state.clients[vc].players[vs];
                victim.health = 0.0;
                victim.last_attacker_index = 1;
            }
            state.gun_game_tick().await;
            // Revive the victim for the next round.
            {
                let (vc, vs) = state.find_player(0).unwrap();
                state.clients[vc].players[vs].health = 100.0;
                if let GameMode::GunGame(gg) = &mut state.game_mode {
                    gg.players[0].dead = false;
                }
            }
        }

        // After clearing the final tier everyone's progression reset.
        if let GameMode::GunGame(gg) = &state.game_mode {
            assert_eq!(gg.players[0].weapon_index, 0);
            assert_eq!(gg.players[1].weapon_index, 0);
        } else {
            panic!("mode changed");
        }
    }

    #[tokio::test]
    async fn gun_game_self_death_demotes_the_victim() {
        let lobby = test_lobby().await;
        let mut state = lobby.state.lock().await;
        state.game_mode = GameMode::GunGame(Default::default());

        state
            .client_init(&mut join_packet(100, 1, PROTOCOL_VERSION, addr(61001)))
            .await
            .unwrap();

        state.current_level = Level::landfall(5);
        state.fight_start = Some(Instant::now());
        state.prepare_gun_game().await;

        if let GameMode::GunGame(gg) = &mut state.game_mode {
            gg.players[0].weapon_index = 3;
        }
        {
            let (vc, vs) = state.find_player(0).unwrap();
            let victim = &mut state.clients[vc].players[vs];
            victim.health = 0.0;
            victim.last_attacker_index = 0;
        }
        state.gun_game_tick().await;

        if let GameMode::GunGame(gg) = &state.game_mode {
            assert_eq!(gg.players[0].weapon_index, 2);
        } else {
            panic!("mode changed");
        }
    }

}
