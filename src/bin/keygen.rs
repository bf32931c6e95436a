//! Offline keypair generator.
//!
//! Prints the public key (account id) and secret key as decimal strings.
//! The secret key goes to whoever needs to sign; the public key is the
//! account other peers send to.

use clap::Parser;

use aurum::crypto::Keypair;
use aurum::genesis::{self, FOUNDER_KEY_BITS};

#[derive(Parser)]
#[command(name = "keygen", version, about = "generate an Aurum keypair")]
struct Args {
    /// Modulus size in bits
    #[arg(long, default_value_t = FOUNDER_KEY_BITS)]
    bits: u64,

    /// Derive demo founding keypair 1..=10 instead of a fresh one
    #[arg(long)]
    founder: Option<usize>,
}

fn main() {
    let args = Args::parse();

    let result = match args.founder {
        Some(index) => genesis::founder_keypair_sized(index, args.bits),
        None => Keypair::generate(args.bits, &mut rand::thread_rng()),
    };

    match result {
        Ok(keypair) => {
            println!("public:  {}", keypair.public_key());
            println!("secret:  {}", keypair.secret_key());
        }
        Err(e) => {
            eprintln!("keygen failed: {e}");
            std::process::exit(1);
        }
    }
}
