use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gatehouse_core::jose::SignatureAlgorithm;
use gatehouse_core::keys;
use gatehouse_core::user;

#[derive(Parser)]
#[command(name = "gatehouse", about = "OpenID Connect provider")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Generate a signing keypair for ID Token issuance
    GenerateKeys {
        /// Output directory for key files
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Signing algorithm (RS256, ES256, ES384, ES512, ...)
        #[arg(short, long, default_value = "RS256")]
        algorithm: String,
        /// RSA key size in bits (ignored for EC curves)
        #[arg(long)]
        key_size: Option<u32>,
    },
    /// Hash a resource-owner password for the [[users]] config section
    HashPassword {
        password: String,
    },
    /// Check config and key material without serving
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=info,tower_http=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let config = gatehouse_core::config::resolve_config(cli.config.as_deref())?;
            gatehouse_api::serve(config).await?;
        }
        Command::GenerateKeys {
            output,
            algorithm,
            key_size,
        } => {
            let algorithm: SignatureAlgorithm = algorithm
                .parse()
                .map_err(|_| anyhow::anyhow!("unknown algorithm '{algorithm}'"))?;
            keys::generate_keypair(&output, algorithm, key_size)?;
        }
        Command::HashPassword { password } => {
            println!("{}", user::hash_password(&password)?);
        }
        Command::Validate => {
            let config = gatehouse_core::config::resolve_config(cli.config.as_deref())?;
            tracing::info!("config loaded successfully");
            let provider = gatehouse_core::Provider::new(config)?;
            tracing::info!(
                algorithms = ?provider.keys.algorithms(),
                users = provider.users.len(),
                "signing keys and user directory loaded"
            );
        }
    }

    Ok(())
}
