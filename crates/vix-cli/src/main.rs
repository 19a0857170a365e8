//! vixctl entry point.
//!
//! Runs one guest or power operation against a VM and prints the result as
//! JSON on stdout. Logs go to stderr; set `RUST_LOG=vix_core=debug` to see
//! every native call and completion.

mod cli;
mod commands;
mod demo;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vix_core::{BridgeConfig, NativeApi, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("vixctl=info".parse()?)
                .add_directive("vix_vm=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();
    tracing::debug!(command = ?cli.command, simulate = cli.simulate, "Starting vixctl");

    let config = BridgeConfig::from_env().context("Invalid bridge configuration")?;
    tracing::debug!(?config, "Configuration loaded");

    let (api, vmx_path): (Arc<dyn NativeApi>, String) = if cli.simulate {
        let vmx_path = cli.vmx.clone().unwrap_or_else(|| demo::DEFAULT_VMX.into());
        tracing::info!(vmx_path = %vmx_path, "Using simulated host");
        let api: Arc<dyn NativeApi> = demo::runtime(&vmx_path);
        (api, vmx_path)
    } else {
        let vmx_path = cli
            .vmx
            .clone()
            .context("No VM given: pass --vmx or set VIX_VMX")?;
        (native_library()?, vmx_path)
    };

    let session = Session::new(api, config);
    let output = commands::execute(&cli, session, &vmx_path).await?;

    let text = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{text}");
    Ok(())
}

#[cfg(feature = "vix-ffi")]
fn native_library() -> anyhow::Result<Arc<dyn NativeApi>> {
    Ok(Arc::new(vix_core::ffi::VixLibrary::new()))
}

#[cfg(not(feature = "vix-ffi"))]
fn native_library() -> anyhow::Result<Arc<dyn NativeApi>> {
    anyhow::bail!("vixctl was built without the vix-ffi feature; use --simulate or rebuild with --features vix-ffi")
}
