//! Levels: identification, wire serialization, and decoded placement data.
//!
//! A level is identified on the wire by a type byte plus variable data
//! (scene index, file path, workshop id, or raw bytes). Workshop levels can
//! additionally be decoded into placement data (spawn points, pre-placed
//! weapons and objects) by an external decoder tool; that decode is lazy,
//! idempotent, and always happens outside any lobby mutex.

use crate::steam::{SteamCmd, SteamError};
use log::trace;
use serde::Deserialize;
use shared::ByteBuffer;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Landfall scene index of the built-in lobby map.
pub const LOBBY_SCENE: i32 = 0;
/// Landfall scene index of the stats recap map.
pub const STATS_SCENE: i32 = 102;
/// App id the workshop downloader fetches content for.
pub const APP_ID: u32 = 674940;

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("workshop download failed: {0}")]
    Download(#[from] SteamError),
    #[error("decoder failed: {0}")]
    Decoder(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("placement data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A pre-placed or spawned object to sync across clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncableObject {
    #[serde(rename = "PositionX", default)]
    pub position_x: f32,
    #[serde(rename = "PositionY", default)]
    pub position_y: f32,
    #[serde(rename = "RotationX", default)]
    pub rotation_x: f32,
    #[serde(rename = "RotationY", default)]
    pub rotation_y: f32,
    #[serde(rename = "ScaleX", default)]
    pub scale_x: f32,
    #[serde(rename = "ScaleY", default)]
    pub scale_y: f32,
    #[serde(rename = "ObjectID", default)]
    pub object_id: String,
    #[serde(rename = "HasMirrorObject", default)]
    pub has_mirror_object: bool,
    #[serde(rename = "PropsSeed", default)]
    pub props_seed: i32,
    #[serde(rename = "NetworkID", default)]
    pub network_id: i32,
}

/// A pre-placed or spawned weapon to sync across clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncableWeapon {
    #[serde(rename = "PositionX", default)]
    pub position_x: f32,
    #[serde(rename = "PositionY", default)]
    pub position_y: f32,
    #[serde(rename = "WeaponID", default)]
    pub weapon_id: i32,
    #[serde(rename = "HasMirrorObject", default)]
    pub has_mirror_object: bool,
    #[serde(rename = "NetworkID", default)]
    pub network_id: i32,
}

/// The JSON the external decoder emits for a map file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecodedLevel {
    #[serde(rename = "SpawnPoints", default)]
    pub spawn_points: Vec<[f32; 2]>,
    #[serde(rename = "PlacedObjects", default)]
    pub placed_objects: Vec<SyncableObject>,
    #[serde(rename = "PlacedWeapons", default)]
    pub placed_weapons: Vec<SyncableWeapon>,
    #[serde(rename = "MapSize", default)]
    pub map_size: f32,
    #[serde(rename = "Theme", default)]
    pub theme: i32,
    #[serde(rename = "Version", default)]
    pub version: String,
}

/// Where a level comes from. The discriminants double as the wire type byte.
#[derive(Debug, Clone)]
pub enum LevelKind {
    /// A built-in scene shipped with the game.
    Landfall { scene_index: i32 },
    /// A map file on the local filesystem.
    Local { path: String },
    /// A workshop item, downloaded and decoded on demand.
    Workshop { id: u64 },
    /// A map streamed as raw bytes.
    Stream { path: String, data: Vec<u8> },
}

#[derive(Debug)]
pub struct Level {
    kind: LevelKind,
    decoded: OnceCell<DecodedLevel>,
}

impl Level {
    pub fn landfall(scene_index: i32) -> Arc<Self> {
        Arc::new(Self {
            kind: LevelKind::Landfall { scene_index },
            decoded: OnceCell::new(),
        })
    }

    pub fn local(path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            kind: LevelKind::Local { path: path.into() },
            decoded: OnceCell::new(),
        })
    }

    pub fn workshop(id: u64) -> Arc<Self> {
        Arc::new(Self {
            kind: LevelKind::Workshop { id },
            decoded: OnceCell::new(),
        })
    }

    pub fn stream(path: impl Into<String>, data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            kind: LevelKind::Stream {
                path: path.into(),
                data,
            },
            decoded: OnceCell::new(),
        })
    }

    pub fn kind(&self) -> &LevelKind {
        &self.kind
    }

    /// The type byte sent on the wire.
    pub fn wire_type(&self) -> u8 {
        match self.kind {
            LevelKind::Landfall { .. } => 0,
            LevelKind::Local { .. } => 1,
            LevelKind::Workshop { .. } => 2,
            LevelKind::Stream { .. } => 3,
        }
    }

    /// The identifying bytes sent on the wire.
    pub fn wire_data(&self) -> Vec<u8> {
        match &self.kind {
            LevelKind::Landfall { scene_index } => {
                let mut buf = ByteBuffer::new();
                buf.write_i32_next(*scene_index);
                buf.into_vec()
            }
            LevelKind::Local { path } => path.as_bytes().to_vec(),
            LevelKind::Workshop { id } => {
                let mut buf = ByteBuffer::new();
                buf.write_u64_next(*id);
                buf.into_vec()
            }
            LevelKind::Stream { data, .. } => data.clone(),
        }
    }

    pub fn wire_size(&self) -> i32 {
        match &self.kind {
            LevelKind::Landfall { .. } => 4,
            LevelKind::Local { path } => path.len() as i32,
            LevelKind::Workshop { .. } => 8,
            LevelKind::Stream { data, .. } => data.len() as i32,
        }
    }

    pub fn scene_index(&self) -> Option<i32> {
        match self.kind {
            LevelKind::Landfall { scene_index } => Some(scene_index),
            _ => None,
        }
    }

    pub fn workshop_id(&self) -> Option<u64> {
        match self.kind {
            LevelKind::Workshop { id } => Some(id),
            _ => None,
        }
    }

    /// True for the map players idle on between matches: the built-in lobby
    /// scene, or any workshop id in the configured lobby-map allow-list.
    pub fn is_lobby(&self, lobby_workshop_ids: &[u64]) -> bool {
        match self.kind {
            LevelKind::Landfall { scene_index } => scene_index == LOBBY_SCENE,
            LevelKind::Workshop { id } => lobby_workshop_ids.contains(&id),
            _ => false,
        }
    }

    /// True for the stats recap map.
    pub fn is_stats(&self) -> bool {
        matches!(self.kind, LevelKind::Landfall { scene_index } if scene_index == STATS_SCENE)
    }

    /// Placement data, if [`Level::load`] has already run.
    pub fn decoded(&self) -> Option<&DecodedLevel> {
        self.decoded.get()
    }

    /// The map scale, or 0 when unknown.
    pub fn map_size(&self) -> f32 {
        self.decoded().map(|d| d.map_size).unwrap_or(0.0)
    }

    /// Ensures the decoded placement data is available. Idempotent; only
    /// the decoded formats (workshop, stream) do any work. Must be called
    /// outside any lobby mutex, since it may hit the disk and spawn the
    /// decoder subprocess.
    pub async fn load(&self, steam: &SteamCmd) -> Result<&DecodedLevel, LevelError> {
        self.decoded
            .get_or_try_init(|| async {
                match &self.kind {
                    LevelKind::Workshop { id } => self.load_workshop(steam, *id).await,
                    LevelKind::Stream { path, .. } => decode_map_file(PathBuf::from(path)).await,
                    // Built-in and local maps carry no decodable placements.
                    _ => Ok(DecodedLevel::default()),
                }
            })
            .await
    }

    async fn load_workshop(&self, steam: &SteamCmd, id: u64) -> Result<DecodedLevel, LevelError> {
        let bin_path = steam.content_path(id);
        if tokio::fs::metadata(&bin_path).await.is_err() {
            trace!("Downloading workshop item {id}...");
            steam.download_item(APP_ID, id).await?;
        } else {
            trace!("Using pre-cached download for workshop item {id}");
        }

        decode_map_file(bin_path).await
    }
}

/// Runs the external decoder over a map file and parses its JSON output.
async fn decode_map_file(bin_path: PathBuf) -> Result<DecodedLevel, LevelError> {
    let json_path = bin_path.with_extension("json");

    if tokio::fs::metadata(&json_path).await.is_err() {
        trace!("Decoding map {}...", bin_path.display());
        let status = tokio::process::Command::new("decoder")
            .arg(&bin_path)
            .arg(&json_path)
            .status()
            .await
            .map_err(|e| LevelError::Decoder(e.to_string()))?;
        if !status.success() {
            return Err(LevelError::Decoder(format!(
                "decoder exited with {status} for {}",
                bin_path.display()
            )));
        }
    } else {
        trace!("Using pre-decoded map at {}", json_path.display());
    }

    let json = tokio::fs::read(&json_path).await?;
    Ok(serde_json::from_slice(&json)?)
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            LevelKind::Landfall { scene_index } => write!(f, "Landfall map: {scene_index}"),
            LevelKind::Local { path } => write!(f, "{path}/Level.bin"),
            LevelKind::Workshop { id } => write!(f, "Workshop map: {id}"),
            LevelKind::Stream { path, .. } => write!(f, "Streamed map: {path}"),
        }
    }
}

/// The maps a fresh lobby idles on.
pub fn default_lobby_levels() -> Vec<Arc<Level>> {
    vec![Level::landfall(LOBBY_SCENE)]
}

/// The default match rotation: the built-in scenes, minus the lobby and
/// stats maps.
pub fn default_rotation() -> Vec<Arc<Level>> {
    (1..=100).map(Level::landfall).collect()
}
