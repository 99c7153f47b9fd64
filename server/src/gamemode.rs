//! Game-mode policies: weapon pools, spawn cadence, and gun-game
//! progression.
//!
//! Modes are a small capability set (done flag, level/weapon pools, spawn
//! rates) plus per-mode state, expressed as a discriminated union rather
//! than a trait object; the lobby holds one by value and switches on it.

use crate::level::Level;
use shared::weapons::{Weapon, DUEL_POOL, GUN_GAME_PROGRESSION, STOCK_POOL, TOURNEY_POOL};
use std::sync::Arc;

/// How often weapons drop, in whole seconds. `0/0` disables spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeaponSpawnRate {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl WeaponSpawnRate {
    pub const fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
        }
    }

    pub fn disabled(&self) -> bool {
        self.min_seconds == 0 && self.max_seconds == 0
    }
}

/// The four in-game presets: normal, fast, none, slow.
pub const STOCK_SPAWN_RATES: &[WeaponSpawnRate] = &[
    WeaponSpawnRate::new(5, 8),
    WeaponSpawnRate::new(3, 5),
    WeaponSpawnRate::new(0, 0),
    WeaponSpawnRate::new(8, 12),
];

pub const TOURNEY_SPAWN_RATES: &[WeaponSpawnRate] = &[WeaponSpawnRate::new(3, 5)];

pub const GUN_GAME_SPAWN_RATES: &[WeaponSpawnRate] = &[WeaponSpawnRate::new(0, 0)];

/// Per-player gun-game progression.
#[derive(Debug, Clone, Copy, Default)]
pub struct GunGamePlayerData {
    /// Whether this player's current death has been processed.
    pub dead: bool,
    /// The player's current tier in the progression list.
    pub weapon_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GunGameState {
    pub done: bool,
    pub players: Vec<GunGamePlayerData>,
}

impl GunGameState {
    /// Grows the per-player table to cover `count` players.
    pub fn ensure_players(&mut self, count: usize) {
        if self.players.len() < count {
            self.players.resize(count, GunGamePlayerData::default());
        }
    }

    /// The weapon a player should currently be fighting with.
    pub fn tier_weapon(&self, player_index: usize) -> Weapon {
        self.players
            .get(player_index)
            .map(|p| GUN_GAME_PROGRESSION[p.weapon_index.min(GUN_GAME_PROGRESSION.len() - 1)])
            .unwrap_or(Weapon::EMPTY)
    }

    /// Advances the attacker one tier. Returns true if they just cleared
    /// the final tier and won the gun game.
    pub fn advance(&mut self, attacker_index: usize) -> bool {
        let Some(data) = self.players.get_mut(attacker_index) else {
            return false;
        };
        if data.weapon_index + 1 >= GUN_GAME_PROGRESSION.len() {
            for player in &mut self.players {
                player.dead = false;
                player.weapon_index = 0;
            }
            return true;
        }
        data.weapon_index += 1;
        false
    }

    /// Knocks the victim back one tier, never below the first.
    pub fn demote(&mut self, victim_index: usize) {
        if let Some(data) = self.players.get_mut(victim_index) {
            data.weapon_index = data.weapon_index.saturating_sub(1);
        }
    }
}

/// The game-mode policy the lobby runs under.
#[derive(Debug, Clone)]
pub enum GameMode {
    /// The default free-for-all.
    Stock,
    /// Competitive rules: reduced pool, single fast spawn rate.
    Tournament,
    /// Two-player rules.
    Duel,
    /// Climb-the-ranks: each tier-matching kill advances your weapon;
    /// sloppy deaths knock you back one.
    GunGame(GunGameState),
}

impl Default for GameMode {
    fn default() -> Self {
        GameMode::Stock
    }
}

impl GameMode {
    pub fn name(&self) -> &'static str {
        match self {
            GameMode::Stock => "Stock",
            GameMode::Tournament => "Tournament",
            GameMode::Duel => "Duel",
            GameMode::GunGame(_) => "Gun Game",
        }
    }

    /// True once post-match processing has finished and the next match may
    /// start. Only gun game defers.
    pub fn is_done(&self) -> bool {
        match self {
            GameMode::GunGame(state) => state.done,
            _ => true,
        }
    }

    /// Levels this mode restricts the rotation to. Empty means any level
    /// is allowed, which every current mode declares.
    pub fn allowed_levels(&self) -> Vec<Arc<Level>> {
        Vec::new()
    }

    /// The weapon pool random spawns draw from.
    pub fn weapons(&self) -> &'static [Weapon] {
        match self {
            GameMode::Stock => STOCK_POOL,
            GameMode::Tournament => TOURNEY_POOL,
            GameMode::Duel => DUEL_POOL,
            GameMode::GunGame(_) => GUN_GAME_PROGRESSION,
        }
    }

    /// The spawn-rate presets this mode allows.
    pub fn spawn_rates(&self) -> &'static [WeaponSpawnRate] {
        match self {
            GameMode::Stock => STOCK_SPAWN_RATES,
            GameMode::Tournament | GameMode::Duel => TOURNEY_SPAWN_RATES,
            GameMode::GunGame(_) => GUN_GAME_SPAWN_RATES,
        }
    }

    /// Whether the match driver should spawn weapons at all.
    pub fn spawns_weapons(&self) -> bool {
        !self.spawn_rates()[0].disabled()
    }
}
