//! Constitution pre-flight checker
//!
//! Canonicalizes and hashes a constitution YAML, verifies the `.sha256`
//! sidecar when present, runs the citation self-test, and reports the
//! static authority/action density. Exits non-zero on any failure so it can
//! gate a deployment pipeline.
//!
//! Usage:
//!   constitution_check <path/to/constitution.yaml> [--json]

#![forbid(unsafe_code)]

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use rsak::constitution::Constitution;
use rsak::state_hash::{initial_state_hash, state_hash_hex, KERNEL_VERSION_ID};

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
        bail!("usage: constitution_check <path/to/constitution.yaml> [--json]");
    };

    let constitution = Constitution::load(Path::new(path))
        .with_context(|| format!("loading constitution from {path}"))?;

    let failures = constitution.self_test();
    let (a, b, m, density) = constitution.compute_density();
    let genesis = initial_state_hash(constitution.hash(), KERNEL_VERSION_ID)
        .context("computing genesis state hash")?;

    if has_flag(&args, "--json") {
        let report = serde_json::json!({
            "path": path,
            "sha256": constitution.hash(),
            "version": constitution.version_str(),
            "canonical_bytes": constitution.canonical_bytes().len(),
            "action_types": constitution.action_types(),
            "authorities": constitution.constitutional_authorities(),
            "required_logs": constitution.required_logs(),
            "density": {"a": a, "b": b, "m": m, "density": density},
            "genesis_state_hash": state_hash_hex(&genesis),
            "self_test_failures": failures,
        });
        println!("{report}");
    } else {
        println!("constitution : {path}");
        println!("sha256       : {}", constitution.hash());
        println!("version      : {}", constitution.version_str());
        println!(
            "canonical    : {} bytes",
            constitution.canonical_bytes().len()
        );
        println!(
            "density      : M={m} / (A={a} x B={b}) = {density:.4}"
        );
        println!("genesis hash : {}", state_hash_hex(&genesis));
        if failures.is_empty() {
            println!("self-test    : ok");
        } else {
            println!("self-test    : {} failure(s)", failures.len());
            for failure in &failures {
                println!("  - {failure}");
            }
        }
    }

    if !failures.is_empty() {
        bail!("constitution self-test failed");
    }
    Ok(())
}
