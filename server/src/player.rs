//! Per-slot player session state.

use shared::types::{DamageType, NetworkPosition, NetworkWeapon};
use shared::{event_channel, update_channel};

/// Match-session statistics for one player. All counters are i32 on the
/// wire, 13 of them, in the order [`PlayerStats::as_wire`] produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub wins: i32,
    pub kills: i32,
    pub deaths: i32,
    pub suicides: i32,
    pub falls: i32,
    pub crown_steals: i32,
    pub bullets_hit: i32,
    pub bullets_missed: i32,
    pub bullets_shot: i32,
    pub blocks: i32,
    pub punches_landed: i32,
    pub weapons_picked_up: i32,
    pub weapons_thrown: i32,
}

impl PlayerStats {
    /// The fixed wire order used by the client-init stats block.
    pub fn as_wire(&self) -> [i32; 13] {
        [
            self.wins,
            self.kills,
            self.deaths,
            self.suicides,
            self.falls,
            self.crown_steals,
            self.bullets_hit,
            self.bullets_missed,
            self.bullets_shot,
            self.blocks,
            self.punches_landed,
            self.weapons_picked_up,
            self.weapons_thrown,
        ]
    }
}

/// A player slot inside a client. The `index` is lobby-wide, stable for the
/// client's lifetime, and determines the player's two wire channels.
#[derive(Debug, Clone)]
pub struct Player {
    pub index: usize,
    pub ready: bool,
    pub spawned: bool,
    pub health: f32,
    pub last_attacker_index: usize,
    pub last_damage_type: DamageType,
    pub position: NetworkPosition,
    pub weapon: NetworkWeapon,
    pub stats: PlayerStats,
}

impl Player {
    pub fn new(index: usize, health: f32) -> Self {
        Self {
            index,
            ready: false,
            spawned: false,
            health,
            last_attacker_index: index,
            last_damage_type: DamageType::default(),
            position: NetworkPosition::default(),
            weapon: NetworkWeapon::default(),
            stats: PlayerStats::default(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0.0
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// The channel this player's positional updates are expected on.
    pub fn channel_update(&self) -> u8 {
        update_channel(self.index)
    }

    /// The channel this player's events (damage, chat, fall-out) travel on.
    pub fn channel_event(&self) -> u8 {
        event_channel(self.index)
    }
}
