mod logging;
mod rig;

use anyhow::{Context, bail};
use cadenza_engine::client::Client;
use cadenza_engine::config::EngineConfig;
use cadenza_engine::message::{Action, Message};
use cadenza_engine::unit::UnitUid;
use cadenza_engine::units::{HwChannels, UnitDescriptor};
use cadenza_engine::AudioContext;
use clap::Parser;
use rig::Rig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, warn};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(author, version, about = "Headless runner for the Cadenza routing engine")]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Units and wiring (JSON). A built-in demo rig is used when omitted
    #[arg(long)]
    rig: Option<PathBuf>,

    /// Session to restore after the rig is built; replaces the rig wiring
    #[arg(long)]
    session: Option<PathBuf>,

    /// Write the session here before exiting
    #[arg(long)]
    save_session: Option<PathBuf>,

    /// Seconds of audio to process
    #[arg(long, default_value_t = 2.0)]
    seconds: f64,

    /// Pace callbacks at the block duration instead of running flat out
    #[arg(long)]
    realtime: bool,

    /// Arm recording before rolling (exercises the pre-roll)
    #[arg(long)]
    record: bool,

    /// Default log filter when CADENZA_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Default)]
struct RunStats {
    callbacks: u64,
    sub_cycles: u64,
    rolled_frames: u64,
    peak: f32,
    slowest: Duration,
    total: Duration,
}

async fn expect_response(rx: &mut Receiver<Message>) -> anyhow::Result<Result<Action, String>> {
    loop {
        match tokio::time::timeout(RESPONSE_TIMEOUT, rx.recv()).await {
            Ok(Some(Message::Response(result))) => return Ok(result),
            Ok(Some(_)) => continue,
            Ok(None) => bail!("engine closed the response channel"),
            Err(_) => bail!("engine did not respond within {:?}", RESPONSE_TIMEOUT),
        }
    }
}

/// Waits for the reply matching `pred`, logging everything else that
/// arrives meanwhile. Errors from the engine are returned as they come.
async fn wait_for(
    rx: &mut Receiver<Message>,
    what: &str,
    pred: impl Fn(&Action) -> bool,
) -> anyhow::Result<Action> {
    loop {
        match expect_response(rx).await? {
            Ok(action) if pred(&action) => return Ok(action),
            Ok(other) => debug!("{:?}", other),
            Err(e) => bail!("{what} failed: {e}"),
        }
    }
}

async fn build_rig(
    client: &Client,
    rx: &mut Receiver<Message>,
    rig: &Rig,
) -> anyhow::Result<HashMap<UnitUid, Arc<HwChannels>>> {
    let mut outputs = HashMap::new();
    for descriptor in &rig.units {
        client.add_unit(descriptor.clone()).await?;
        let added = wait_for(rx, "adding a unit", |a| matches!(a, Action::UnitAdded { .. })).await?;
        if let Action::UnitAdded {
            uid,
            name,
            ports,
            hw_channels,
        } = added
        {
            info!("Added {} ({}) with {} port(s)", name, uid, ports.len());
            let is_output = matches!(descriptor, UnitDescriptor::HardwareOutput { .. });
            if let (true, Some(channels)) = (is_output, hw_channels) {
                outputs.insert(uid, channels);
            }
        }
    }
    for conn in &rig.connections {
        client
            .send(Action::Connect {
                src: conn.src,
                dest: conn.dest,
                multiplier: conn.multiplier,
                locked: false,
            })
            .await?;
        wait_for(rx, "connecting", |a| matches!(a, Action::Connect { .. })).await?;
    }
    Ok(outputs)
}

fn run_audio(
    mut context: AudioContext,
    outputs: Vec<Arc<HwChannels>>,
    config: &EngineConfig,
    seconds: f64,
    realtime: bool,
) -> RunStats {
    let block = config.block_size.max(1);
    let block_time = Duration::from_secs_f64(block as f64 / config.sample_rate.max(1) as f64);
    let callbacks = (seconds * config.sample_rate as f64 / block as f64).ceil() as u64;
    let mut stats = RunStats::default();
    if let Err(e) = context.start() {
        error!("Falling back to inline processing: {}", e);
    }
    let mut next_deadline = Instant::now() + block_time;
    for _ in 0..callbacks {
        let started = Instant::now();
        let report = context.process(block);
        let elapsed = started.elapsed();
        stats.callbacks += 1;
        stats.sub_cycles += report.sub_cycles as u64;
        stats.rolled_frames += report.rolled_frames as u64;
        stats.total += elapsed;
        stats.slowest = stats.slowest.max(elapsed);
        for hw in &outputs {
            for ch in 0..hw.len() {
                let data = hw.channel(ch);
                let peak = data[..block.min(data.len())]
                    .iter()
                    .fold(0.0_f32, |acc, s| acc.max(s.abs()));
                stats.peak = stats.peak.max(peak);
            }
        }
        if realtime {
            let now = Instant::now();
            if next_deadline > now {
                std::thread::sleep(next_deadline - now);
            } else if elapsed > block_time {
                warn!("Callback overran: {:?} > {:?}", elapsed, block_time);
            }
            next_deadline += block_time;
        }
    }
    context.terminate();
    stats
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    logging::init(&args.log_level);

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let rig = match &args.rig {
        Some(path) => Rig::load(path)?,
        None => Rig::demo(),
    };
    info!(
        "Starting: {} Hz, block {}, {} worker(s), {} unit(s)",
        config.sample_rate,
        config.block_size,
        config.worker_threads(),
        rig.units.len()
    );

    let (tx, engine, context) = cadenza_engine::init(config.clone());
    let client = Client::new(tx);
    let mut rx = client.subscribe().await?;

    let outputs = build_rig(&client, &mut rx, &rig).await?;
    if let Some(path) = &args.session {
        client.send(Action::LoadSession(path.clone())).await?;
        wait_for(&mut rx, "loading the session", |a| {
            matches!(a, Action::LoadSession(_))
        })
        .await?;
    }
    client.send(Action::RecalcGraph).await?;
    wait_for(&mut rx, "building the graph", |a| matches!(a, Action::GraphRebuilt)).await?;

    if args.record {
        client.send(Action::SetRecordEnabled(true)).await?;
    }
    client.play().await?;

    let outputs: Vec<Arc<HwChannels>> = outputs.into_values().collect();
    let audio_config = config.clone();
    let (seconds, realtime) = (args.seconds, args.realtime);
    let audio = std::thread::Builder::new()
        .name("cadenza-audio".to_string())
        .spawn(move || run_audio(context, outputs, &audio_config, seconds, realtime))
        .context("failed to spawn the audio thread")?;

    let stats = loop {
        if audio.is_finished() {
            break audio
                .join()
                .map_err(|_| anyhow::anyhow!("audio thread panicked"))?;
        }
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Some(Message::Response(Ok(Action::Transport(event))))) => info!("{:?}", event),
            Ok(Some(Message::Response(Err(e)))) => warn!("{}", e),
            Ok(Some(other)) => debug!("{:?}", other),
            Ok(None) => bail!("engine stopped unexpectedly"),
            Err(_) => {}
        }
    };

    if let Some(path) = &args.save_session {
        client.send(Action::SaveSession(path.clone())).await?;
        wait_for(&mut rx, "saving the session", |a| {
            matches!(a, Action::SaveSession(_))
        })
        .await?;
    }
    client.quit().await?;
    engine.await?;

    let avg = if stats.callbacks > 0 {
        stats.total / stats.callbacks as u32
    } else {
        Duration::ZERO
    };
    info!(
        "Processed {} callback(s), {} sub-cycle(s), {} rolled frame(s); avg {:?}, max {:?}, peak {:.3}",
        stats.callbacks, stats.sub_cycles, stats.rolled_frames, avg, stats.slowest, stats.peak
    );
    Ok(())
}
