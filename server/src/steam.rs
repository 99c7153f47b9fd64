//! External Steam collaborators: the username lookup web service and the
//! workshop content downloader. Both are treated as opaque, fallible
//! dependencies; failures degrade gracefully (numeric ids for names, wire
//! form for undecoded maps) and never take down a lobby.

use log::{trace, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SteamError {
    #[error("no steamcmd directory configured")]
    NotConfigured,
    #[error("steamcmd failed to start: {0}")]
    Spawn(std::io::Error),
    #[error("steamcmd exited with {0}")]
    Exited(std::process::ExitStatus),
    #[error("workshop item {0} missing after download")]
    Missing(u64),
}

#[derive(Debug, Deserialize)]
struct PlayerSummary {
    #[serde(rename = "personaname")]
    persona_name: String,
}

#[derive(Debug, Deserialize)]
struct SummariesPayload {
    players: Vec<PlayerSummary>,
}

#[derive(Debug, Deserialize)]
struct SummariesResponse {
    response: SummariesPayload,
}

/// Lazily-populated map from SteamId to display name.
///
/// `display` is the synchronous, never-blocking accessor used from inside
/// lobby handlers; it falls back to the numeric id until a lookup has
/// completed. `lookup` does the actual web request.
#[derive(Debug)]
pub struct UsernameCache {
    key: Option<String>,
    http: reqwest::Client,
    cache: Mutex<HashMap<u64, String>>,
}

impl UsernameCache {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key,
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The cached display name, or the numeric id. Never blocks.
    pub fn display(&self, steam_id: u64) -> String {
        self.cache
            .lock()
            .map(|cache| cache.get(&steam_id).cloned())
            .ok()
            .flatten()
            .unwrap_or_else(|| steam_id.to_string())
    }

    /// Resolves a SteamId to a display name, caching the result. Falls back
    /// to the numeric id on any failure.
    pub async fn lookup(&self, steam_id: u64) -> String {
        if let Ok(cache) = self.cache.lock() {
            if let Some(name) = cache.get(&steam_id) {
                return name.clone();
            }
        }

        let Some(key) = self.key.as_deref() else {
            return steam_id.to_string();
        };

        let url = format!(
            "https://api.steampowered.com/ISteamUser/GetPlayerSummaries/v2/?key={key}&steamids={steam_id}"
        );
        let name = match self.fetch(&url).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                trace!("No summary returned for {steam_id}");
                return steam_id.to_string();
            }
            Err(e) => {
                warn!("Username lookup for {steam_id} failed: {e}");
                return steam_id.to_string();
            }
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(steam_id, name.clone());
        }
        name
    }

    async fn fetch(&self, url: &str) -> Result<Option<String>, reqwest::Error> {
        let parsed: SummariesResponse = self.http.get(url).send().await?.json().await?;
        Ok(parsed
            .response
            .players
            .into_iter()
            .next()
            .map(|p| p.persona_name))
    }
}

/// Wrapper around the steamcmd workshop downloader. Idempotent against
/// disk: callers check [`SteamCmd::content_path`] before downloading.
#[derive(Debug)]
pub struct SteamCmd {
    dir: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl SteamCmd {
    pub fn new(dir: Option<String>, username: Option<String>, password: Option<String>) -> Self {
        Self {
            dir,
            username,
            password,
        }
    }

    /// Where a downloaded workshop item's map file lands on disk.
    pub fn content_path(&self, workshop_id: u64) -> PathBuf {
        let dir = self.dir.as_deref().unwrap_or(".");
        PathBuf::from(dir)
            .join("steamapps/workshop/content")
            .join(crate::level::APP_ID.to_string())
            .join(workshop_id.to_string())
            .join("Level.bin")
    }

    /// Downloads a workshop item, skipping the work if it is already on
    /// disk.
    pub async fn download_item(&self, app_id: u32, workshop_id: u64) -> Result<(), SteamError> {
        let target = self.content_path(workshop_id);
        if tokio::fs::metadata(&target).await.is_ok() {
            trace!("Workshop item {workshop_id} already on disk");
            return Ok(());
        }

        let dir = self.dir.as_deref().ok_or(SteamError::NotConfigured)?;

        let mut cmd = Command::new("steamcmd");
        cmd.current_dir(dir);
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => {
                cmd.arg("+login").arg(user).arg(pass);
            }
            _ => {
                cmd.arg("+login").arg("anonymous");
            }
        }
        cmd.arg("+workshop_download_item")
            .arg(app_id.to_string())
            .arg(workshop_id.to_string())
            .arg("+quit");

        let status = cmd.status().await.map_err(SteamError::Spawn)?;
        if !status.success() {
            return Err(SteamError::Exited(status));
        }
        if tokio::fs::metadata(&target).await.is_err() {
            return Err(SteamError::Missing(workshop_id));
        }
        Ok(())
    }
}
