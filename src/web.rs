#![cfg(not(tarpaulin_include))]

use chemviz::app;
use chemviz::config::ServerConfig;
use chemviz::login::UserRegistry;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(about = "Chemical equipment dataset server")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve(ServerConfig),

    /// Create the initial administrator account and exit
    CreateAdmin(ServerConfig),
}

/// Main entry point for the web application
///
/// Logging is controlled through `RUST_LOG` and defaults to `info`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Opts::parse().command {
        Command::Serve(config) => app::run(config).await,
        Command::CreateAdmin(config) => {
            config.validate()?;
            let users = UserRegistry::open(config.users_path())?;
            if users.ensure_admin(&config.admin)? {
                println!("Administrator '{}' is ready.", config.admin.username);
            } else {
                println!("An administrator already exists; nothing to do.");
            }
            Ok(())
        }
    }
}
