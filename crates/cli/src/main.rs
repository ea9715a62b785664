// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! whirr: run a workflow simulation against a platform description.
//!
//! Takes a platform TOML as its first argument, builds a storage service
//! and a batch scheduler over the described hosts, and drives a small
//! demonstration workflow through them, printing the event timeline.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod demo;

#[derive(Debug, Parser)]
#[command(name = "whirr", about = "discrete-event workflow simulator")]
struct Args {
    /// Platform description (TOML).
    platform: PathBuf,

    /// Log filter, e.g. `whirr_storage=debug` (also honors RUST_LOG).
    #[arg(long = "log")]
    log: Option<String>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help/version are clean exits; everything else is a usage
            // error.
            if err.use_stderr() {
                let _ = err.print();
                return ExitCode::from(1);
            }
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
    };

    init_logging(args.log.as_deref());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("whirr: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = match filter {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::from_default_env(),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    let platform = whirr_core::Platform::from_toml_file(&args.platform)
        .with_context(|| format!("loading platform {}", args.platform.display()))?;
    demo::run_demo(platform).context("simulation failed")
}
