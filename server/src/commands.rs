//! The thin `/` chat command shell.
//!
//! Chat messages are broadcast packets; a leading slash makes the lobby
//! interpret them too. Feedback goes back through spoofed chat: `said` is
//! heard by everyone, `thought` only by the issuer. Anything touching lobby
//! settings checks ownership first.

use crate::level::Level;
use crate::lobby::{LobbyState, NO_WINNER};
use shared::{unix_now, Packet, PacketType};

/// Interprets one slash command. Returns whether a match start should be
/// attempted after the lobby mutex is released.
pub async fn handle(
    state: &mut LobbyState,
    client_index: usize,
    slot: usize,
    player_index: usize,
    timestamp: u32,
    message: &str,
) -> bool {
    let trimmed = message.trim_start_matches('/');
    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return false;
    };
    let steam_id = state.clients[client_index].steam_id;

    match command {
        "options" => {
            let addr = state.clients[client_index].addr;
            state
                .send(&Packet::new(PacketType::RequestingOptions, 0, 0), addr)
                .await;
        }

        "ping" => {
            let delay = unix_now().saturating_sub(timestamp);
            state
                .player_said(player_index, &format!("{delay} second(s)\n2+ is bad"))
                .await;
        }

        "public" => {
            if state.is_owner(steam_id) {
                state.public = true;
                state.player_said(player_index, "Set lobby to public!").await;
            } else {
                state.player_said(player_index, "No permissions!").await;
            }
        }

        "private" => {
            if state.is_owner(steam_id) {
                state.public = false;
                state.player_said(player_index, "Set lobby to private!").await;
            } else {
                state.player_said(player_index, "No permissions!").await;
            }
        }

        "pause" | "unready" | "afk" | "brb" => {
            state.clients[client_index].paused = true;
            state
                .player_said(player_index, "Paused for next match!")
                .await;
        }

        "resume" | "ready" => {
            state.clients[client_index].paused = false;
            for player in &mut state.clients[client_index].players {
                player.set_ready(true);
            }
            state.player_said(player_index, "Ready!").await;
            return !state.match_in_progress();
        }

        "tourney" | "tournament" | "challenge" | "hard" | "hardmode" => {
            if state.is_owner(steam_id) {
                state.tourney_rules = !state.tourney_rules;
                let feedback = if state.tourney_rules {
                    "Enabled tournament rules!"
                } else {
                    "Disabled tournament rules!"
                };
                state.player_said(player_index, feedback).await;
            } else {
                state.player_said(player_index, "No permissions!").await;
            }
        }

        "hp" => {
            let Some(argument) = parts.get(1) else {
                let health = state.clients[client_index].players[slot].health;
                state
                    .player_said(player_index, &format!("HP: {health:.2}"))
                    .await;
                return false;
            };
            if !state.is_owner(steam_id) {
                state.player_said(player_index, "No permissions!").await;
                return false;
            }
            match argument.parse::<u8>() {
                Ok(setting) if setting <= 6 => {
                    state.health = setting;
                    let max = state.max_health();
                    state
                        .player_said(player_index, &format!("Set max HP: {max:.2}"))
                        .await;
                }
                _ => {
                    state
                        .player_said(player_index, "Invalid HP setting!")
                        .await;
                }
            }
        }

        "maxplayers" => {
            if !state.is_owner(steam_id) {
                state.player_said(player_index, "No permissions!").await;
                return false;
            }
            let Some(argument) = parts.get(1) else {
                state
                    .player_said(player_index, "/maxplayers playerCount")
                    .await;
                return false;
            };
            match argument.parse::<usize>() {
                Ok(max_players) if max_players >= state.max_players => {
                    state.max_players = max_players;
                    state
                        .player_said(player_index, &format!("Set max players to {max_players}!"))
                        .await;
                }
                Ok(_) => {
                    state
                        .player_said(player_index, "Cannot lower max players yet!")
                        .await;
                }
                Err(_) => {
                    state
                        .player_said(player_index, "Invalid playerCount!")
                        .await;
                }
            }
        }

        "travel" => {
            let (Some(x_arg), Some(y_arg)) = (parts.get(1), parts.get(2)) else {
                state.player_said(player_index, "/travel posX posY").await;
                return false;
            };
            let Ok(pos_x) = x_arg.parse::<i16>() else {
                state.player_said(player_index, "Invalid posX!").await;
                return false;
            };
            let Ok(pos_y) = y_arg.parse::<i16>() else {
                state.player_said(player_index, "Invalid posY!").await;
                return false;
            };

            // A server-built positional update teleports the player.
            let channel = state.clients[client_index].players[slot].channel_update();
            let mut update = Packet::new(PacketType::PlayerUpdate, channel, steam_id);
            update.payload.write_i16_next(pos_x);
            update.payload.write_i16_next(pos_y);
            update.payload.write_bytes_next(&[0u8; 8]);

            state.broadcast(&update, None).await;
            state
                .player_said(player_index, &format!("Traveled to X:{pos_x} Y:{pos_y}"))
                .await;
        }

        "map" => return handle_map(state, player_index, steam_id, &parts).await,

        _ => {
            state.player_said(player_index, "Unknown command!").await;
        }
    }

    false
}

/// `/map` and its subcommands: show, switch, add to the rotation, or jump
/// to a raw scene.
async fn handle_map(
    state: &mut LobbyState,
    player_index: usize,
    steam_id: u64,
    parts: &[&str],
) -> bool {
    let Some(&subcommand) = parts.get(1) else {
        let current = state.current_level.to_string();
        state
            .player_said(player_index, &format!("Current map: {current}"))
            .await;
        return false;
    };

    if !state.is_owner(steam_id) {
        state.player_said(player_index, "No permissions!").await;
        return false;
    }

    match subcommand {
        "add" => {
            let (Some(&kind), Some(&id_arg)) = (parts.get(2), parts.get(3)) else {
                state
                    .player_said(player_index, "/map add {landfall/steam} mapID")
                    .await;
                return false;
            };
            match kind {
                "landfall" | "Landfall" | "lf" | "LF" => {
                    let Ok(scene_index) = id_arg.parse::<i32>() else {
                        state.player_said(player_index, "Invalid map index!").await;
                        return false;
                    };
                    if scene_index < 0 {
                        state.player_said(player_index, "Invalid map index!").await;
                        return false;
                    }
                    let level = Level::landfall(scene_index);
                    let name = level.to_string();
                    state.levels.push(level);
                    state
                        .player_said(player_index, &format!("Added map: {name}"))
                        .await;
                }
                "steam" | "Steam" | "workshop" | "Workshop" | "sw" | "SW" => {
                    let Ok(workshop_id) = id_arg.parse::<u64>() else {
                        state
                            .player_said(player_index, "Invalid workshop ID!")
                            .await;
                        return false;
                    };
                    let level = Level::workshop(workshop_id);
                    let name = level.to_string();
                    state.levels.push(level);
                    state
                        .player_said(player_index, &format!("Added map: {name}"))
                        .await;
                    // Everyone needs the refreshed workshop cycle.
                    state.workshop_maps_loaded(None).await;
                }
                unknown => {
                    state
                        .player_said(player_index, &format!("Unknown map type: {unknown}"))
                        .await;
                }
            }
        }

        "scene" => {
            let Some(&scene_arg) = parts.get(2) else {
                state
                    .player_said(player_index, "Must specify sceneIndex!")
                    .await;
                return false;
            };
            match scene_arg.parse::<i32>() {
                Ok(scene_index) if scene_index >= 0 => {
                    state.temp_map(scene_index, NO_WINNER).await;
                    state
                        .player_said(player_index, &format!("New map: Landfall {scene_index}!"))
                        .await;
                }
                _ => {
                    state
                        .player_said(player_index, "Invalid scene index!")
                        .await;
                }
            }
        }

        index_arg => {
            let level_count = state.levels.len();
            match index_arg.parse::<i32>() {
                Ok(map_index) if map_index >= -1 && (map_index as i64) < level_count as i64 => {
                    state.change_map(map_index, NO_WINNER).await;
                    let name = state.current_level.to_string();
                    state
                        .player_said(player_index, &format!("New map: {name}!"))
                        .await;
                }
                _ => {
                    state
                        .player_said(
                            player_index,
                            &format!(
                                "Invalid map index!\n0 to {}\n-1 for random",
                                level_count.saturating_sub(1)
                            ),
                        )
                        .await;
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lobby::Lobby;
    use crate::network::Shared;
    use shared::PROTOCOL_VERSION;
    use std::net::SocketAddr;
    use std::sync::Arc;

    async fn lobby_with_two_clients() -> Arc<Lobby> {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let lobby = Lobby::new(Shared::new(Config::default(), Arc::new(socket)));
        for (steam_id, port) in [(100u64, 21001u16), (200, 21002)] {
            let mut packet = Packet::new(PacketType::ClientRequestingIndex, 0, 0);
            packet.payload.write_u64_next(steam_id);
            packet.payload.write_u8_next(1);
            packet.payload.write_u8_next(PROTOCOL_VERSION);
            packet.src = Some(format!("127.0.0.1:{port}").parse::<SocketAddr>().unwrap());
            lobby.client_init(&mut packet).await.unwrap();
        }
        lobby
    }

    #[tokio::test]
    async fn ready_command_readies_and_requests_a_start() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;

        let try_start = handle(&mut state, 0, 0, 0, unix_now(), "/ready").await;
        assert!(try_start);
        assert!(state.clients[0].players[0].ready);
        assert!(!state.clients[0].paused);
    }

    #[tokio::test]
    async fn pause_command_marks_the_client_paused() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;

        handle(&mut state, 0, 0, 0, unix_now(), "/pause").await;
        assert!(state.clients[0].paused);
        handle(&mut state, 0, 0, 0, unix_now(), "/resume").await;
        assert!(!state.clients[0].paused);
    }

    #[tokio::test]
    async fn owner_gates_protect_settings() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;

        // Client 1 is not the owner; nothing changes.
        handle(&mut state, 1, 0, 1, unix_now(), "/private").await;
        assert!(state.public);
        handle(&mut state, 1, 0, 1, unix_now(), "/tourney").await;
        assert!(!state.tourney_rules);
        handle(&mut state, 1, 0, 1, unix_now(), "/hp 3").await;
        assert_eq!(state.health, 0);

        // The owner can.
        handle(&mut state, 0, 0, 0, unix_now(), "/private").await;
        assert!(!state.public);
        handle(&mut state, 0, 0, 0, unix_now(), "/tourney").await;
        assert!(state.tourney_rules);
        handle(&mut state, 0, 0, 0, unix_now(), "/hp 3").await;
        assert_eq!(state.health, 3);
        assert_eq!(state.max_health(), 1.0);
    }

    #[tokio::test]
    async fn max_players_can_only_be_raised() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;

        handle(&mut state, 0, 0, 0, unix_now(), "/maxplayers 2").await;
        assert_eq!(state.max_players, 4);

        handle(&mut state, 0, 0, 0, unix_now(), "/maxplayers 8").await;
        assert_eq!(state.max_players, 8);
    }

    #[tokio::test]
    async fn map_add_extends_the_rotation() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;

        let before = state.levels.len();
        handle(&mut state, 0, 0, 0, unix_now(), "/map add landfall 12").await;
        handle(&mut state, 0, 0, 0, unix_now(), "/map add steam 123456789").await;
        assert_eq!(state.levels.len(), before + 2);
        assert_eq!(state.levels.last().unwrap().workshop_id(), Some(123456789));
    }

    #[tokio::test]
    async fn map_scene_swaps_the_level_immediately() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;

        handle(&mut state, 0, 0, 0, unix_now(), "/map scene 14").await;
        assert_eq!(state.current_level.scene_index(), Some(14));
        assert!(!state.match_in_progress());
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let lobby = lobby_with_two_clients().await;
        let mut state = lobby.state.lock().await;
        // Only checks the shell does not mutate anything.
        let try_start = handle(&mut state, 0, 0, 0, unix_now(), "/abracadabra").await;
        assert!(!try_start);
        assert_eq!(state.max_players, 4);
        assert!(state.public);
    }
}
