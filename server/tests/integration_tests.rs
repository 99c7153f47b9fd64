//! Integration tests for the dedicated server.
//!
//! These drive cross-component behavior: real UDP framing on real sockets,
//! the full join → ready → fight → map-change lifecycle, and the
//! concurrency properties the lobby promises.

use server::config::Config;
use server::lobby::{Lobby, KILLING_BLOW, NO_WINNER};
use server::network::{build_status, Shared};
use shared::types::DamageType;
use shared::{
    event_channel, unix_now, Packet, PacketType, MIN_DATAGRAM, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

async fn test_shared() -> Arc<Shared> {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    Shared::new(Config::default(), Arc::new(socket))
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn join_packet(steam_id: u64, src: SocketAddr) -> Packet {
    let mut packet = Packet::new(PacketType::ClientRequestingIndex, 0, 0);
    packet.payload.write_u64_next(steam_id);
    packet.payload.write_u8_next(1);
    packet.payload.write_u8_next(PROTOCOL_VERSION);
    packet.src = Some(src);
    packet
}

fn ready_packet(player_index: usize, src: SocketAddr) -> Packet {
    let mut packet = Packet::new(
        PacketType::ClientReadyUp,
        event_channel(player_index),
        0,
    );
    packet.payload.write_u8_next(1);
    packet.payload.write_u8_next(player_index as u8);
    packet.src = Some(src);
    packet
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// A framed packet survives a real UDP hop byte-for-byte.
    #[tokio::test]
    async fn framing_survives_a_real_socket() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut packet = Packet::new(PacketType::ClientJoined, 0, 76561198000000001);
        packet.payload.write_u8_next(1);
        packet.payload.write_u64_next(76561198000000002);
        let sent = packet.to_datagram();

        sender.send_to(&sent, receiver_addr).await.unwrap();

        let mut buffer = [0u8; 2048];
        let (len, _) = receiver.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..len], &sent[..]);

        let decoded = Packet::from_datagram(&buffer[..len]).unwrap();
        assert_eq!(decoded.kind, PacketType::ClientJoined);
        assert_eq!(decoded.steam_id, 76561198000000001);
        assert_eq!(decoded.payload.read_u8_at(0).unwrap(), 1);
        assert_eq!(decoded.to_datagram(), sent);
    }

    /// The envelope overhead is always present, even with no payload.
    #[test]
    fn zero_payload_datagram_is_fourteen_bytes() {
        let packet = Packet::new(PacketType::StartMatch, 0, 0);
        assert_eq!(packet.to_datagram().len(), MIN_DATAGRAM);
    }
}

/// LOBBY LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Two clients join, ready up on the lobby map (no fight there), get
    /// moved to a real level, ready up again, and the match starts.
    #[tokio::test]
    async fn two_client_join_and_start() {
        let lobby = Lobby::new(test_shared().await);

        lobby
            .client_init(&mut join_packet(100, addr(25001)))
            .await
            .unwrap();
        lobby
            .client_init(&mut join_packet(200, addr(25002)))
            .await
            .unwrap();

        {
            let state = lobby.state.lock().await;
            assert_eq!(state.player_count(false), 2);
            assert!(state.current_is_lobby());
        }

        // Ready up on the lobby map: accepted, but no match may start.
        lobby.handle(ready_packet(0, addr(25001))).await;
        lobby.handle(ready_packet(1, addr(25002))).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        {
            let state = lobby.state.lock().await;
            assert!(state.clients[0].players[0].ready);
            assert!(state.clients[1].players[0].ready);
            assert!(!state.match_in_progress(), "no fight on the lobby map");
        }

        // Operator moves the lobby onto a real level; that un-readies
        // everyone.
        {
            let mut state = lobby.state.lock().await;
            state.temp_map(5, NO_WINNER).await;
            assert!(!state.clients[0].players[0].ready);
            assert!(!state.clients[1].players[0].ready);
        }

        // Both ready again; the start sequence includes the 3 s countdown.
        lobby.handle(ready_packet(0, addr(25001))).await;
        lobby.handle(ready_packet(1, addr(25002))).await;
        tokio::time::sleep(Duration::from_secs(4)).await;

        let state = lobby.state.lock().await;
        assert!(state.match_in_progress(), "match should have started");
    }

    /// One unready player blocks the start.
    #[tokio::test]
    async fn start_is_blocked_until_everyone_is_ready() {
        let lobby = Lobby::new(test_shared().await);

        lobby
            .client_init(&mut join_packet(100, addr(25101)))
            .await
            .unwrap();
        lobby
            .client_init(&mut join_packet(200, addr(25102)))
            .await
            .unwrap();

        {
            let mut state = lobby.state.lock().await;
            state.temp_map(5, NO_WINNER).await;
        }

        // Only player 0 readies up.
        lobby.handle(ready_packet(0, addr(25101))).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let state = lobby.state.lock().await;
        assert!(!state.match_in_progress());
    }

    /// Scenario: A claims a killing blow from B; B wins, the map rotates,
    /// both players come back restored.
    #[tokio::test]
    async fn damage_and_winner() {
        let lobby = Lobby::new(test_shared().await);

        lobby
            .client_init(&mut join_packet(100, addr(25201)))
            .await
            .unwrap();
        lobby
            .client_init(&mut join_packet(200, addr(25202)))
            .await
            .unwrap();

        {
            let mut state = lobby.state.lock().await;
            state.temp_map(5, NO_WINNER).await;
            state.fight_start = Some(std::time::Instant::now());
            for client in &mut state.clients {
                client.players[0].ready = true;
            }
        }

        let mut damage = Packet::new(PacketType::PlayerTookDamage, event_channel(0), 0);
        damage.payload.write_u8_next(1); // attacker: player 1
        damage.payload.write_f32_next(KILLING_BLOW);
        damage.payload.write_u8_next(0); // no particle direction
        damage.payload.write_u8_next(DamageType::OTHER.0);
        damage.src = Some(addr(25201));
        lobby.handle(damage).await;

        let state = lobby.state.lock().await;
        assert!(!state.match_in_progress(), "fight must be over");
        let (vc, vs) = state.find_player(0).unwrap();
        let (ac, asl) = state.find_player(1).unwrap();
        assert_eq!(state.clients[vc].players[vs].stats.deaths, 1);
        assert_eq!(state.clients[ac].players[asl].stats.kills, 1);
        // Everyone restored and un-readied for the next round.
        assert_eq!(state.clients[vc].players[vs].health, state.max_health());
        assert!(!state.clients[vc].players[vs].ready);
        assert!(!state.clients[ac].players[asl].ready);
    }

    /// Scenario: a stale time-checked packet is dropped while an older
    /// exempt packet is still accepted.
    #[tokio::test]
    async fn stale_packet_gating() {
        let lobby = Lobby::new(test_shared().await);
        lobby
            .client_init(&mut join_packet(100, addr(25301)))
            .await
            .unwrap();

        // Advance the lobby clock with a fresh time-checked packet.
        let now = unix_now();
        let mut advance = Packet::new(PacketType::RequestingOptions, 0, 0);
        advance.timestamp = now;
        advance.src = Some(addr(25301));
        lobby.handle(advance).await;

        // A player-update stamped earlier is exempt and still accepted.
        let mut update = Packet::new(PacketType::PlayerUpdate, 2, 0);
        update.timestamp = now - 50;
        update.payload.write_i16_next(5);
        update.payload.write_i16_next(6);
        update.payload.write_bytes_next(&[0, 0, 0, 0, 0]);
        update.payload.write_u16_next(0); // no projectiles
        update.payload.write_u8_next(0); // empty weapon
        update.src = Some(addr(25301));
        lobby.handle(update).await;

        // A kick stamped earlier is time-checked and dropped.
        let mut kick = Packet::new(PacketType::KickPlayer, 0, 0);
        kick.timestamp = now - 50;
        kick.src = Some(addr(25301));
        lobby.handle(kick).await;

        let state = lobby.state.lock().await;
        assert_eq!(state.clients.len(), 1, "stale kick must not remove the client");
        let (ci, slot) = state.find_player(0).unwrap();
        assert_eq!(
            state.clients[ci].players[slot].position.position.x, 5.0,
            "exempt update must have been applied"
        );
    }
}

/// CONCURRENCY PROPERTY TESTS
mod concurrency_tests {
    use super::*;
    use std::collections::HashSet;

    /// Scenario: 10,000 weapon ids allocated from concurrent tasks form
    /// the exact dense-from-top set with no duplicates.
    #[tokio::test]
    async fn spawn_id_reservation_under_parallel_allocation() {
        let lobby = Lobby::new(test_shared().await);
        lobby
            .client_init(&mut join_packet(100, addr(26001)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lobby = lobby.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::with_capacity(1250);
                for _ in 0..1250 {
                    let mut state = lobby.state.lock().await;
                    ids.push(state.next_weapon_spawn_id(false));
                }
                ids
            }));
        }

        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.await.unwrap());
        }

        assert_eq!(all_ids.len(), 10_000);
        let unique: HashSet<u16> = all_ids.iter().copied().collect();
        assert_eq!(unique.len(), 10_000, "an id was handed out twice");

        let expected: HashSet<u16> = (55535..=65534).collect();
        assert_eq!(unique, expected);
    }

    /// Scenario: the status page answers while a lobby mutex is held, so
    /// it provably never takes one.
    #[tokio::test]
    async fn status_does_not_touch_the_lobby_mutex() {
        let shared = test_shared().await;
        let lobbies = Arc::new(RwLock::new(Vec::new()));

        let lobby = Lobby::new(shared.clone());
        for (steam_id, port) in [(100u64, 26101u16), (200, 26102), (300, 26103)] {
            lobby
                .client_init(&mut join_packet(steam_id, addr(port)))
                .await
                .unwrap();
        }
        lobbies.write().await.push(lobby.clone());

        // Hold the lobby mutex, as a broadcast mid-fight would.
        let _guard = lobby.state.lock().await;

        let status = tokio::time::timeout(
            Duration::from_millis(250),
            build_status(&shared, &lobbies),
        )
        .await
        .expect("status must not block on the lobby mutex");

        assert!(status.online);
        assert_eq!(status.lobbies, 1);
        assert_eq!(status.players_online, 3);
    }

    /// Closing a lobby flips the routing mirrors immediately.
    #[tokio::test]
    async fn close_is_visible_without_the_mutex() {
        let lobby = Lobby::new(test_shared().await);
        lobby
            .client_init(&mut join_packet(100, addr(26201)))
            .await
            .unwrap();

        assert!(lobby.is_running());
        assert!(lobby.contains_addr(addr(26201)));

        lobby.close().await;
        assert!(!lobby.is_running());
        assert!(!lobby.contains_addr(addr(26201)));
        assert_eq!(lobby.player_count(), 0);
    }
}
