//! Per-connection client session state.

use crate::player::Player;
use std::net::SocketAddr;

/// One UDP endpoint attached to a lobby, holding its player slots.
///
/// The lobby owns its clients; a client owns its players. A client is
/// created by the index-request handler and destroyed when kicked, when it
/// leaves, or when its lobby closes.
#[derive(Debug)]
pub struct Client {
    pub addr: SocketAddr,
    pub steam_id: u64,
    /// Suppresses the automatic ready-up for the next match.
    pub paused: bool,
    pub players: Vec<Player>,
}

impl Client {
    pub fn new(addr: SocketAddr, steam_id: u64) -> Self {
        Self {
            addr,
            steam_id,
            paused: false,
            players: Vec::new(),
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}
