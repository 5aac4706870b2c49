//! Operator CLI for the gateway.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gatehouse::auth::token::{sign, Claims};
use gatehouse::config::load_config;
use gatehouse::session::now_secs;

#[derive(Parser)]
#[command(name = "gatehouse-cli")]
#[command(about = "Management CLI for the Gatehouse API gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print a summary
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(short, long, default_value = "config/gatehouse.toml")]
        config: PathBuf,
    },
    /// Mint a signed session token for testing
    SignToken {
        /// Signing secret (min 32 bytes, must match the gateway)
        #[arg(short, long, env = "GATEHOUSE_SESSION_SIGNING_SECRET")]
        secret: String,

        /// Subject user id
        #[arg(short, long)]
        user: String,

        /// Session id claim
        #[arg(long, default_value = "cli-session")]
        session: String,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,

        /// Roles, comma separated
        #[arg(long, default_value = "")]
        roles: String,

        /// Permissions, comma separated
        #[arg(long, default_value = "")]
        permissions: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => match load_config(&config) {
            Ok(loaded) => {
                println!("Configuration OK: {}", config.display());
                println!("  listener: {}", loaded.server.listen_addr());
                println!("  routes:   {}", loaded.routes.len());
                for route in &loaded.routes {
                    println!(
                        "    {} {} {} -> {}{}",
                        route.id,
                        route.methods.join("|"),
                        route.path,
                        route.upstream,
                        if route.auth_required { " [auth]" } else { "" },
                    );
                }
                println!(
                    "  session store: {}",
                    loaded.session.store_url.as_deref().unwrap_or("in-memory")
                );
                println!(
                    "  rate limit store: {}",
                    loaded
                        .rate_limit
                        .store_url
                        .as_deref()
                        .unwrap_or("in-memory")
                );
            }
            Err(e) => {
                eprintln!("Configuration invalid: {}", e);
                std::process::exit(1);
            }
        },
        Commands::SignToken {
            secret,
            user,
            session,
            ttl,
            roles,
            permissions,
        } => {
            if secret.len() < 32 {
                eprintln!("Signing secret must be at least 32 bytes");
                std::process::exit(1);
            }
            let now = now_secs();
            let claims = Claims {
                sub: user,
                sid: session,
                iat: now,
                nbf: None,
                exp: now + ttl,
                roles: split_list(&roles),
                permissions: split_list(&permissions),
            };
            println!("{}", sign(&claims, secret.as_bytes()));
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
