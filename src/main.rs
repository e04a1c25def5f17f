use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use xplane_bridge::config;
use xplane_bridge::demo::{HelloPlugin, CAMERA_INDEX, COUNTER_INDEX, HELLO_INDEX};
use xplane_bridge::host::SimHost;
use xplane_bridge::plugin::PluginRuntime;

/// Run the hello plugin against the simulated host and print bridge stats.
#[derive(Parser, Debug)]
#[command(name = "xplane-bridge", version)]
struct Args {
    /// Number of simulated frames to run
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Seconds per simulated frame
    #[arg(long, default_value_t = 0.05)]
    frame_secs: f32,

    /// Bridge config (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Toggle the camera shake on before running frames
    #[arg(long)]
    shake: bool,

    /// Print what the plugin wrote to the host log
    #[arg(long)]
    host_log: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let bridge_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::BridgeConfig::default(),
    };
    info!(?bridge_config, "config loaded");

    let host = Arc::new(SimHost::new().with_frame_secs(args.frame_secs));
    let mut runtime = PluginRuntime::new(HelloPlugin::with_config(bridge_config), host.clone());

    let plugin_info = runtime.start()?;
    info!(name = plugin_info.name.as_str(), "started");
    runtime.enable()?;

    let menu = runtime.plugin().menu().context("plugin created no menu")?;
    host.click_menu_item(menu, HELLO_INDEX);
    if args.shake {
        host.click_menu_item(menu, CAMERA_INDEX);
    }

    let ticks = host.run_frames(args.frames);
    host.click_menu_item(menu, COUNTER_INDEX);
    info!(frames = args.frames, ticks, sim_time = host.now(), "frames done");

    if let Some(bridge) = runtime.bridge() {
        println!("{}", bridge.stats().to_json());
    }

    runtime.disable();
    runtime.stop();

    if args.host_log {
        for line in host.log_lines() {
            eprint!("{line}");
        }
    }
    Ok(())
}
