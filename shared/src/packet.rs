//! Packet envelope and framing.
//!
//! Every datagram is framed the same way:
//!
//! ```text
//! start-of-packet header, 5 bytes:
//!   0x0  u32 LE  timestamp (seconds since epoch)
//!   0x4  u8      opcode
//! payload, 0..N bytes, opcode specific
//! end-of-packet header, 9 bytes:
//!   0x0  u64 LE  recipient SteamId
//!   0x8  u8      channel
//! ```
//!
//! The trailing header mirrors what the relay overlay used to stamp onto
//! each message; the game's packet handling still expects it, so it is part
//! of the contract. Datagrams shorter than the two headers are rejected.

use crate::codec::{ByteBuffer, CodecError};
use crate::unix_now;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Size of the start-of-packet header.
pub const SOPH_SIZE: usize = 5;
/// Size of the end-of-packet header.
pub const EOPH_SIZE: usize = 9;
/// Smallest datagram the framing can produce.
pub const MIN_DATAGRAM: usize = SOPH_SIZE + EOPH_SIZE;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("datagram of {0} bytes is smaller than the {MIN_DATAGRAM}-byte envelope")]
    TooSmall(usize),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("payload truncated: {0}")]
    Truncated(#[from] CodecError),
}

/// The 1-byte packet type. Numeric values are fixed by the shipped client
/// and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Ping = 0,
    PingResponse = 1,
    ClientJoined = 2,
    ClientRequestingAccepting = 3,
    ClientAccepted = 4,
    ClientInit = 5,
    ClientRequestingIndex = 6,
    ClientRequestingToSpawn = 7,
    ClientSpawned = 8,
    ClientReadyUp = 9,
    PlayerUpdate = 10,
    PlayerTookDamage = 11,
    PlayerTalked = 12,
    PlayerForceAdded = 13,
    PlayerForceAddedAndBlock = 14,
    PlayerLavaForceAdded = 15,
    PlayerFallOut = 16,
    PlayerWonWithRicochet = 17,
    MapChange = 18,
    WeaponSpawned = 19,
    WeaponThrown = 20,
    ClientRequestingWeaponThrow = 21,
    ClientRequestingWeaponDrop = 22,
    WeaponDropped = 23,
    WeaponWasPickedUp = 24,
    ClientRequestingWeaponPickUp = 25,
    ObjectUpdate = 26,
    ObjectSpawned = 27,
    ObjectSimpleDestruction = 28,
    ObjectInvokeDestructionEvent = 29,
    ObjectDestructionCollision = 30,
    GroundWeaponsInit = 31,
    MapInfo = 32,
    MapInfoSync = 33,
    WorkshopMapsLoaded = 34,
    StartMatch = 35,
    ObjectHello = 36,
    OptionsChanged = 37,
    KickPlayer = 38,
    ClientLeft = 39,
    LobbyType = 40,
    RequestingOptions = 41,
    /// Reserved for the HTTP side-channel on the same port.
    Http = 254,
    /// Unassigned.
    Null = 255,
}

impl PacketType {
    pub fn from_byte(value: u8) -> Option<Self> {
        use PacketType::*;
        Some(match value {
            0 => Ping,
            1 => PingResponse,
            2 => ClientJoined,
            3 => ClientRequestingAccepting,
            4 => ClientAccepted,
            5 => ClientInit,
            6 => ClientRequestingIndex,
            7 => ClientRequestingToSpawn,
            8 => ClientSpawned,
            9 => ClientReadyUp,
            10 => PlayerUpdate,
            11 => PlayerTookDamage,
            12 => PlayerTalked,
            13 => PlayerForceAdded,
            14 => PlayerForceAddedAndBlock,
            15 => PlayerLavaForceAdded,
            16 => PlayerFallOut,
            17 => PlayerWonWithRicochet,
            18 => MapChange,
            19 => WeaponSpawned,
            20 => WeaponThrown,
            21 => ClientRequestingWeaponThrow,
            22 => ClientRequestingWeaponDrop,
            23 => WeaponDropped,
            24 => WeaponWasPickedUp,
            25 => ClientRequestingWeaponPickUp,
            26 => ObjectUpdate,
            27 => ObjectSpawned,
            28 => ObjectSimpleDestruction,
            29 => ObjectInvokeDestructionEvent,
            30 => ObjectDestructionCollision,
            31 => GroundWeaponsInit,
            32 => MapInfo,
            33 => MapInfoSync,
            34 => WorkshopMapsLoaded,
            35 => StartMatch,
            36 => ObjectHello,
            37 => OptionsChanged,
            38 => KickPlayer,
            39 => ClientLeft,
            40 => LobbyType,
            41 => RequestingOptions,
            254 => Http,
            255 => Null,
            _ => return None,
        })
    }

    /// True for opcodes whose timestamps are gated against the lobby's
    /// monotone clock. Latency-tolerant traffic (pings, positional spam,
    /// chat, damage claims) is exempt so a slow client is not muted.
    pub fn should_check_time(&self) -> bool {
        use PacketType::*;
        !matches!(
            self,
            Ping | PingResponse
                | ClientReadyUp
                | PlayerUpdate
                | PlayerTalked
                | PlayerForceAdded
                | PlayerForceAddedAndBlock
                | PlayerLavaForceAdded
                | PlayerFallOut
                | PlayerWonWithRicochet
                | PlayerTookDamage
                | ClientRequestingWeaponThrow
        )
    }

    /// True if traffic of this type should be logged. Positional updates
    /// arrive every tick and are only logged when explicitly enabled.
    pub fn should_log(&self, log_player_update: bool) -> bool {
        match self {
            PacketType::PlayerUpdate => log_player_update,
            _ => true,
        }
    }

    pub fn name(&self) -> &'static str {
        use PacketType::*;
        match self {
            Ping => "ping",
            PingResponse => "pingResponse",
            ClientJoined => "clientJoined",
            ClientRequestingAccepting => "clientRequestingAccepting",
            ClientAccepted => "clientAccepted",
            ClientInit => "clientInit",
            ClientRequestingIndex => "clientRequestingIndex",
            ClientRequestingToSpawn => "clientRequestingToSpawn",
            ClientSpawned => "clientSpawned",
            ClientReadyUp => "clientReadyUp",
            PlayerUpdate => "playerUpdate",
            PlayerTookDamage => "playerTookDamage",
            PlayerTalked => "playerTalked",
            PlayerForceAdded => "playerForceAdded",
            PlayerForceAddedAndBlock => "playerForceAddedAndBlock",
            PlayerLavaForceAdded => "playerLavaForceAdded",
            PlayerFallOut => "playerFallOut",
            PlayerWonWithRicochet => "playerWonWithRicochet",
            MapChange => "mapChange",
            WeaponSpawned => "weaponSpawned",
            WeaponThrown => "weaponThrown",
            ClientRequestingWeaponThrow => "clientRequestingWeaponThrow",
            ClientRequestingWeaponDrop => "clientRequestingWeaponDrop",
            WeaponDropped => "weaponDropped",
            WeaponWasPickedUp => "weaponWasPickedUp",
            ClientRequestingWeaponPickUp => "clientRequestingWeaponPickUp",
            ObjectUpdate => "objectUpdate",
            ObjectSpawned => "objectSpawned",
            ObjectSimpleDestruction => "objectSimpleDestruction",
            ObjectInvokeDestructionEvent => "objectInvokeDestructionEvent",
            ObjectDestructionCollision => "objectDestructionCollision",
            GroundWeaponsInit => "groundWeaponsInit",
            MapInfo => "mapInfo",
            MapInfoSync => "mapInfoSync",
            WorkshopMapsLoaded => "workshopMapsLoaded",
            StartMatch => "startMatch",
            ObjectHello => "objectHello",
            OptionsChanged => "optionsChanged",
            KickPlayer => "kickPlayer",
            ClientLeft => "clientLeft",
            LobbyType => "lobbyType",
            RequestingOptions => "requestingOptions",
            Http => "HTTP",
            Null => "null",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", *self as u8, self.name())
    }
}

/// Returns true if a datagram is actually an HTTP request tunnelled onto the
/// game port. Checked before any framing interpretation.
pub fn is_http_get(data: &[u8]) -> bool {
    data.starts_with(b"GET")
}

/// A framed network packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Sender-side wall clock, seconds since epoch.
    pub timestamp: u32,
    pub kind: PacketType,
    /// Per-player multiplexing tag, see the channel algebra in the crate root.
    pub channel: u8,
    /// Intended recipient, or 0 for "the server / everyone".
    pub steam_id: u64,
    pub payload: ByteBuffer,
    /// Where the datagram came from. Not serialized.
    pub src: Option<SocketAddr>,
}

impl Packet {
    /// A fresh outbound packet stamped with the current time.
    pub fn new(kind: PacketType, channel: u8, steam_id: u64) -> Self {
        Self {
            timestamp: unix_now(),
            kind,
            channel,
            steam_id,
            payload: ByteBuffer::new(),
            src: None,
        }
    }

    /// Deframes a raw datagram.
    pub fn from_datagram(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < MIN_DATAGRAM {
            return Err(PacketError::TooSmall(data.len()));
        }

        let mut buf = ByteBuffer::from_vec(data.to_vec());
        let timestamp = buf.read_u32_next()?;
        let kind_byte = buf.read_u8_next()?;
        let kind = PacketType::from_byte(kind_byte).ok_or(PacketError::UnknownOpcode(kind_byte))?;

        let payload_len = data.len() - MIN_DATAGRAM;
        let payload = ByteBuffer::from_vec(buf.read_bytes_next(payload_len)?);

        let steam_id = buf.read_u64_next()?;
        let channel = buf.read_u8_next()?;

        Ok(Self {
            timestamp,
            kind,
            channel,
            steam_id,
            payload,
            src: None,
        })
    }

    /// Frames the packet back into a datagram.
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.grow(MIN_DATAGRAM + self.payload.capacity());
        buf.write_u32_next(self.timestamp);
        buf.write_u8_next(self.kind as u8);
        buf.write_bytes_next(self.payload.bytes());
        buf.write_u64_next(self.steam_id);
        buf.write_u8_next(self.channel);
        buf.into_vec()
    }

    pub fn should_check_time(&self) -> bool {
        self.kind.should_check_time()
    }

    pub fn should_log(&self, log_player_update: bool) -> bool {
        self.kind.should_log(log_player_update)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {} {:?}",
            self.channel,
            self.timestamp,
            self.kind,
            self.payload.bytes()
        )
    }
}
