//! Odaw - a beat grid transport with one-shot capture and playback
//!
//! This is the headless entry point: it stands in for the grid view, drives
//! the transport clock and reports each tick's playhead and overlay.

mod audio;
mod cli;
mod models;
mod settings;
mod tokio_runtime;
mod transport;

use anyhow::{bail, Context};
use audio::devices;
use audio::PipeWireEngine;
use clap::Parser;
use cli::{Command, RunArgs};
use log::info;
use models::TransportPhase;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use transport::{Transport, TransportConfig, DEFAULT_TEMPO_BPM};

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    match args.command.unwrap_or_default() {
        Command::Devices => list_devices(),
        Command::Select { index } => {
            settings::set_selected_device(index);
            println!("Input device {} will be used for the next run", index);
            Ok(())
        }
        Command::Run(run) => run_transport(run),
    }
}

fn list_devices() -> anyhow::Result<()> {
    let names = devices::input_device_names();
    if names.is_empty() {
        println!("No input devices found; capture will use the default input");
    }
    for (index, name) in names.iter().enumerate() {
        println!("{:>3}  {}", index, name);
    }
    Ok(())
}

fn run_transport(run: RunArgs) -> anyhow::Result<()> {
    let tempo = run
        .tempo
        .or_else(settings::get_tempo)
        .unwrap_or(DEFAULT_TEMPO_BPM);

    let device = run.device.or_else(settings::get_selected_device);
    if let Some(index) = device {
        devices::select_input_device(index);
    }

    if run.remember {
        settings::set_tempo(tempo);
        if let Some(index) = device {
            settings::set_selected_device(index);
        }
    }

    let mut config = TransportConfig::default().with_tempo(tempo);
    if let Some(seconds) = run.seconds {
        config = config.with_capture_duration(Duration::from_secs(seconds));
    }
    if let Some(output) = run.output {
        config = config.with_container_path(output);
    }

    let runtime = tokio_runtime::init().context("Failed to start the worker runtime")?;
    let mut transport = Transport::new(
        config,
        Arc::new(PipeWireEngine),
        runtime.handle().clone(),
        devices::selection(),
    )
    .context("Failed to set up the transport")?;

    info!("Starting transport at {} BPM", tempo);

    let ticks = runtime.block_on(drive(&mut transport, run.json))?;

    if let TransportPhase::Failed(reason) = transport.phase() {
        bail!("Transport failed: {}", reason);
    }
    info!("Transport finished after {} ticks", ticks);
    Ok(())
}

/// Tick the transport on its interval until it reaches a terminal phase
async fn drive(transport: &mut Transport, json: bool) -> anyhow::Result<u64> {
    let mut interval = tokio::time::interval(transport.config().tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let output = transport.tick();
        if json {
            println!("{}", serde_json::to_string(&output)?);
        }
        if output.phase.is_terminal() {
            return Ok(output.tick);
        }
    }
}
