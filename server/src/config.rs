//! Runtime configuration, filled in from the command line.

/// Settings the rest of the server consumes. Built once in `main` and shared
/// read-only from then on.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP and TCP bind address.
    pub address: String,
    /// Largest datagram accepted off the socket.
    pub max_buffer_size: usize,
    /// Hard cap on concurrent lobbies.
    pub max_lobbies: usize,
    /// Log level 0..2 (warn / info / trace). `RUST_LOG` overrides.
    pub verbosity: u8,
    /// Log every positional update. Extremely spammy.
    pub log_player_update: bool,
    /// Web API key for the username lookup service.
    pub steam_key: Option<String>,
    /// Credentials for the workshop downloader.
    pub steam_username: Option<String>,
    pub steam_password: Option<String>,
    /// Install directory of the workshop downloader tool.
    pub steamcmd_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:1337".to_string(),
            max_buffer_size: 8192,
            max_lobbies: 100,
            verbosity: 0,
            log_player_update: false,
            steam_key: None,
            steam_username: None,
            steam_password: None,
            steamcmd_dir: None,
        }
    }
}
