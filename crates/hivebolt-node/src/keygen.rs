//! keygen — generate a HiveBolt identity.
//!
//! Prints a fresh secp256k1 secret key (hex), the compressed public key,
//! and the derived `hb…` address. Suitable for `node_secret_key` and the
//! validator roster.

use clap::Parser;

use hivebolt_crypto::KeyPair;

#[derive(Parser, Debug)]
#[command(name = "keygen", version, about = "Generate a HiveBolt keypair")]
struct Args {
    /// Emit machine-readable JSON instead of labelled lines.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let keypair = KeyPair::generate();
    let pubkey_hex = hex::encode(keypair.public_key());

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "secret_key": keypair.secret_hex(),
                "public_key": pubkey_hex,
                "address": keypair.address().to_string(),
            })
        );
    } else {
        println!("secret key: {}", keypair.secret_hex());
        println!("public key: {pubkey_hex}");
        println!("address:    {}", keypair.address());
    }
}
