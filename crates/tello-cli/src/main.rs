use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use tello_controller::{ControllerError, Drone};
use tello_emulator::{doctor as emulator_doctor, Emulator, EmulatorConfig, EmulatorEvent};
use tello_messenger::{
    doctor as listener_doctor, BackoffPolicy, RelayEvent, RelayService, SimReceiver, SimTransmitter,
};
use tello_proto::{Command, Response};
use tello_state::doctor as state_doctor;

#[derive(Debug, Parser)]
#[command(name = "tello", version, about = "Tello control core with a simulated vehicle")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Validate the configuration file.
    Doctor,
    /// Boot the emulator, connect a drone to it and fly the mission.
    Simulate,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    emulator: EmulatorConfig,
    listener: ListenerCfg,
    altimeter: Option<AltimeterCfg>,
    mission: MissionCfg,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct ListenerCfg {
    queue_capacity: usize,
    #[serde(flatten)]
    backoff: BackoffPolicy,
}

impl Default for ListenerCfg {
    fn default() -> Self {
        Self { queue_capacity: 256, backoff: BackoffPolicy::default() }
    }
}

#[derive(Debug, serde::Deserialize)]
struct AltimeterCfg {
    barometric_cm: f64,
    actual_cm: f64,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct MissionCfg {
    commands: Vec<String>,
    step_delay_ms: u64,
    settle_ms: u64,
}

impl Default for MissionCfg {
    fn default() -> Self {
        Self { commands: Vec::new(), step_delay_ms: 500, settle_ms: 1000 }
    }
}

impl MissionCfg {
    fn parse(&self) -> Result<Vec<Command>> {
        self.commands
            .iter()
            .enumerate()
            .map(|(i, line)| {
                line.parse::<Command>()
                    .with_context(|| format!("mission.commands[{}]", i))
            })
            .collect()
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Cmd::Doctor => doctor(&cfg)?,
        Cmd::Simulate => simulate(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    emulator_doctor::check_config(&cfg.emulator)?;
    listener_doctor::check_backoff(&cfg.listener.backoff)?;
    anyhow::ensure!(cfg.listener.queue_capacity > 0, "listener.queue_capacity must be positive");
    if let Some(alt) = &cfg.altimeter {
        state_doctor::check_altimeter(alt.barometric_cm, alt.actual_cm)?;
    } else {
        info!("doctor: no [altimeter] section, MSL will equal the barometer reading");
    }

    let mission = cfg.mission.parse()?;
    if mission.is_empty() {
        warn!("doctor: mission is empty, simulate will only connect and disconnect");
    }

    info!("doctor: OK");
    Ok(())
}

async fn simulate(cfg: &Config) -> Result<()> {
    info!("simulate: starting");
    emulator_doctor::check_config(&cfg.emulator).context("emulator config")?;
    let mission = cfg.mission.parse()?;

    let state_link = Arc::new(SimTransmitter::new(cfg.listener.queue_capacity));
    let video_link = Arc::new(SimTransmitter::new(cfg.listener.queue_capacity));
    let emulator = Arc::new(
        Emulator::builder()
            .config(cfg.emulator.clone())
            .state_link(state_link.clone())
            .video_link(video_link.clone())
            .build()?,
    );
    let backoff = cfg.listener.backoff;
    let drone = Drone::builder()
        .transceiver(emulator.clone())
        .state_receiver(Arc::new(SimReceiver::new("state", state_link, backoff)))
        .video_receiver(Arc::new(SimReceiver::new("video", video_link, backoff)))
        .build()?;
    let controller = drone.controller().clone();

    let mut states = controller.subscribe_state();
    let state_log = tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(ev) => info!(
                    battery = ev.state.battery_percent,
                    motor_s = ev.state.motor_time_s,
                    "state: {}",
                    ev.position
                ),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "state: log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut video = drone.video_receiver().subscribe();
    let video_log = tokio::spawn(async move {
        let mut frames = 0u64;
        loop {
            match video.recv().await {
                Ok(RelayEvent::Message(_)) => {
                    frames += 1;
                    if frames % 30 == 0 {
                        info!(frames, "video: receiving");
                    }
                }
                Ok(RelayEvent::Exception(e)) => warn!(error = %e, "video: listener fault"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut vehicle_events = emulator.state_manager().subscribe();
    let vehicle_log = tokio::spawn(async move {
        while let Ok(ev) = vehicle_events.recv().await {
            match ev {
                EmulatorEvent::BatteryDied => warn!("vehicle: battery died"),
                other => info!(event = ?other, "vehicle"),
            }
        }
    });

    emulator.power_on();
    controller.connect().await.context("connect to simulated vehicle")?;
    if let Some(alt) = &cfg.altimeter {
        controller.calibrate_altimeter(alt.barometric_cm, alt.actual_cm);
    }

    let step_delay = Duration::from_millis(cfg.mission.step_delay_ms);
    for command in mission {
        match controller.execute(command).await {
            Ok(Response::Value(v)) => info!(%command, value = v, "mission: answered"),
            Ok(_) => info!(%command, "mission: ok"),
            Err(ControllerError::Rejected { reason, .. }) => {
                warn!(%command, %reason, "mission: rejected, continuing")
            }
            Err(e) => return Err(e).with_context(|| format!("mission aborted at `{}`", command)),
        }
        tokio::select! {
            _ = tokio::time::sleep(step_delay) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("simulate: interrupted");
                break;
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(cfg.mission.settle_ms)).await;
    if let Some(last) = controller.last_state() {
        println!("{}", last.position);
    }

    controller.disconnect().await;
    emulator.power_off();
    for task in [state_log, video_log, vehicle_log] {
        task.abort();
    }
    info!("simulate: done");
    Ok(())
}
