//! # Shared Protocol Library
//!
//! Everything both ends of the wire have to agree on: the byte-buffer codec,
//! the packet envelope and opcode table, the channel algebra that multiplexes
//! per-player streams over one socket, and the gameplay primitives (weapons,
//! positions, damage types) that ride inside packet payloads.
//!
//! The protocol is byte-exact: every multi-byte field is little-endian,
//! floats are IEEE-754 binary32, and opcode values are fixed by the shipped
//! game client. Nothing in this crate may change the on-wire layout without
//! breaking every existing client.

pub mod codec;
pub mod packet;
pub mod types;
pub mod weapons;

pub use codec::{ByteBuffer, CodecError};
pub use packet::{Packet, PacketError, PacketType, EOPH_SIZE, MIN_DATAGRAM, SOPH_SIZE};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The only client protocol revision this server speaks.
pub const PROTOCOL_VERSION: u8 = 25;

/// Seconds since the Unix epoch, truncated to the wire's u32 timestamp.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as u32
}

/// The channel that positional update packets for a player travel on.
///
/// This is a wire contract with the game client: channels 0 and 1 are
/// reserved for connection management, and each player index claims the
/// following pair.
pub fn update_channel(player_index: usize) -> u8 {
    (player_index * 2 + 2) as u8
}

/// The channel that event packets (damage, chat, fall-out) for a player
/// travel on. Always the update channel plus one.
pub fn event_channel(player_index: usize) -> u8 {
    (player_index * 2 + 3) as u8
}

/// Inverse of [`update_channel`]. Returns `None` for the reserved channels.
pub fn player_index_from_update_channel(channel: u8) -> Option<usize> {
    if channel < 2 {
        return None;
    }
    Some((channel as usize - 2) / 2)
}

/// Inverse of [`event_channel`]. Returns `None` for the reserved channels.
pub fn player_index_from_event_channel(channel: u8) -> Option<usize> {
    if channel < 3 {
        return None;
    }
    Some((channel as usize - 3) / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trip() {
        for index in 0..=126 {
            assert_eq!(
                player_index_from_update_channel(update_channel(index)),
                Some(index)
            );
            assert_eq!(
                player_index_from_event_channel(event_channel(index)),
                Some(index)
            );
        }
    }

    #[test]
    fn channel_pairs_are_adjacent() {
        for index in 0..8 {
            assert_eq!(event_channel(index), update_channel(index) + 1);
        }
    }

    #[test]
    fn reserved_channels_have_no_player() {
        assert_eq!(player_index_from_update_channel(0), None);
        assert_eq!(player_index_from_update_channel(1), None);
        assert_eq!(player_index_from_event_channel(2), None);
    }

    #[test]
    fn event_channel_floors_to_same_player() {
        // Event packets carry odd channels; the update inverse floors to the
        // same player index, which the damage path relies on.
        for index in 0..8 {
            assert_eq!(
                player_index_from_update_channel(event_channel(index)),
                Some(index)
            );
        }
    }
}
