//! bitchat-keygen — generate (or inspect) a local BitChat identity without
//! starting the daemon.

use bitchat_core::identity::Identity;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "bitchat-keygen", version, about = "Generate or inspect a BitChat device identity")]
struct Args {
    /// Directory to load the identity from, generating one if absent.
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Generate a fresh ephemeral identity instead, printing it without
    /// touching disk.
    #[arg(long)]
    ephemeral: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let identity = if args.ephemeral {
        Identity::ephemeral()
    } else {
        match Identity::load_or_generate(&args.data_dir) {
            Ok(id) => id,
            Err(e) => {
                eprintln!("failed to load or generate identity: {e}");
                std::process::exit(1);
            }
        }
    };

    info!(data_dir = ?args.data_dir, ephemeral = args.ephemeral, "identity ready");
    println!("noise public key : {}", hex::encode(identity.noise_public_bytes()));
    println!("signing key      : {}", hex::encode(identity.verifying_key().to_bytes()));
    println!("short peer id    : {}", hex::encode(identity.short_peer_id()));
    println!("fingerprint      : {}", identity.fingerprint());
}
