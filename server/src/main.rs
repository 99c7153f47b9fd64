use clap::Parser;
use log::{info, LevelFilter};
use server::config::Config;
use server::network::Server;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// UDP and TCP address to bind
    #[clap(short, long, default_value = "0.0.0.0:1337")]
    address: String,

    /// Maximum datagram size in bytes
    #[clap(long, default_value = "8192")]
    max_buffer_size: usize,

    /// Maximum number of concurrent lobbies
    #[clap(long, default_value = "100")]
    max_lobbies: usize,

    /// Log verbosity, 0 (warnings) to 2 (trace)
    #[clap(short, long, default_value = "0")]
    verbosity: u8,

    /// Log every positional player update (very spammy)
    #[clap(long)]
    log_player_update: bool,

    /// Web API key for the username lookup service
    #[clap(long)]
    steam_key: Option<String>,

    /// Login for the workshop downloader
    #[clap(long)]
    username: Option<String>,

    /// Password for the workshop downloader
    #[clap(long)]
    password: Option<String>,

    /// Install directory of the workshop downloader tool
    #[clap(long)]
    steamcmd_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG still wins over the verbosity flag, as usual.
    let default_level = match args.verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(default_level)
        .parse_default_env()
        .init();

    let config = Config {
        address: args.address,
        max_buffer_size: args.max_buffer_size,
        max_lobbies: args.max_lobbies,
        verbosity: args.verbosity,
        log_player_update: args.log_player_update,
        steam_key: args.steam_key,
        steam_username: args.username,
        steam_password: args.password,
        steamcmd_dir: args.steamcmd_dir,
    };

    info!("Starting dedicated server on {}", config.address);

    // Bind failures surface here and exit non-zero.
    let server = Server::bind(config).await?;
    server.run().await;

    info!("Server shut down cleanly");
    Ok(())
}
