//! Sovereign key-schedule tool
//!
//! Prints the deterministic HKDF-SHA256 Ed25519 key schedule for a seed:
//! one identifier per chain position, genesis first. Replay harnesses and
//! tests use this to pin the sovereign lineage without any OS randomness.
//!
//! Usage:
//!   derive_keys <hex-seed> [--rotations N] [--private]
//!
//! Private keys are only printed with an explicit --private flag.

#![forbid(unsafe_code)]

use std::env;

use anyhow::{bail, Context};
use rsak::signature::precompute_keypairs;

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(seed_hex) = args.iter().find(|a| !a.starts_with("--")) else {
        bail!("usage: derive_keys <hex-seed> [--rotations N] [--private]");
    };
    let seed = hex::decode(seed_hex).context("seed must be hex")?;

    let rotations: u64 = parse_flag(&args, "--rotations")
        .map(|v| v.parse())
        .transpose()
        .context("--rotations must be an integer")?
        .unwrap_or(4);
    let show_private = args.iter().any(|a| a == "--private");

    let schedule = precompute_keypairs(&seed, rotations).context("deriving key schedule")?;
    for (position, (key, identifier)) in schedule.iter().enumerate() {
        if show_private {
            println!(
                "{position:>3}  {identifier}  seed={}",
                hex::encode(key.to_bytes())
            );
        } else {
            println!("{position:>3}  {identifier}");
        }
    }
    Ok(())
}
