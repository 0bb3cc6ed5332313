use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    choose_device, AccessToken, CloudClient, DeviceSessionController, Field, Session,
    SessionEvent, SlotStatus,
};
use shared::{
    color,
    domain::{DeviceId, DeviceSummary},
};
use storage::Storage;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Parser, Debug)]
#[command(name = "panel", about = "Control an LED clock through the device cloud")]
struct Cli {
    /// Access token; defaults to the saved one.
    #[arg(long, global = true)]
    token: Option<String>,
    /// Device id; defaults to the last used device, then the first listed.
    #[arg(long, global = true)]
    device: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    SaveToken {
        token: String,
    },
    ForgetToken,
    Devices,
    Connect,
    Patterns,
    Get {
        field: Field,
    },
    Set {
        field: Field,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    Color {
        hex: String,
    },
    TogglePower,
    ToggleClock,
    /// Select a pattern by index or name.
    Pattern {
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let settings = load_settings();

    let database_url =
        prepare_database_url(cli.database_url.as_deref().unwrap_or(&settings.database_url));
    let storage = Storage::new(&database_url).await?;

    match &cli.command {
        Command::SaveToken { token } => {
            if token.trim().is_empty() {
                bail!("Please enter your access token.");
            }
            storage.save_access_token(token).await?;
            println!("Saved access token.");
            return Ok(());
        }
        Command::ForgetToken => {
            if storage.clear_access_token().await? {
                println!("Forgot access token.");
            } else {
                println!("No access token saved.");
            }
            return Ok(());
        }
        _ => {}
    }

    let client = CloudClient::new(&settings.api_base_url, settings.request_timeout())?;
    debug!("panel: device cloud {}", client.base_url());
    let controller =
        DeviceSessionController::with_retry_policy(Arc::new(client), settings.retry_policy());
    tokio::spawn(log_events(controller.subscribe_events()));

    let token = match cli.token {
        Some(token) => Some(token),
        None => storage.access_token().await?,
    };
    if let Some(token) = token.filter(|token| !token.trim().is_empty()) {
        controller.set_access_token(AccessToken::new(token)).await;
    }

    let devices = controller.discover_devices().await?;
    if let Command::Devices = cli.command {
        print_devices(&devices);
        return Ok(());
    }

    let device = select_device(&storage, &devices, cli.device).await?;
    if let Command::Connect = cli.command {
        let session = controller.connect(device).await;
        print_session(&session);
        return Ok(());
    }
    // everything else reads only what it needs
    controller.attach(device).await?;

    match cli.command {
        Command::Patterns => {
            let patterns = controller.refresh_patterns().await?;
            let active = controller.snapshot().await.active_pattern_index;
            for entry in &patterns {
                let marker = if active == Some(entry.index) { "*" } else { " " };
                println!("{marker} {:>3}  {}", entry.index, entry.name);
            }
        }
        Command::Get { field } => {
            let value = controller.refresh_field(field).await?;
            println!("{field}: {value}");
        }
        Command::Set { field, value } => {
            let confirmed = controller.set_field(field, value).await?;
            println!("{}: {confirmed}", controller.snapshot().await.status);
        }
        Command::Color { hex } => {
            let rgb = controller.set_color(&hex).await?;
            println!("Color set: {}", color::to_hex(rgb));
        }
        Command::TogglePower => {
            controller.refresh_field(Field::Power).await?;
            controller.toggle_power().await?;
            println!("{}", controller.snapshot().await.status);
        }
        Command::ToggleClock => {
            controller.refresh_field(Field::ClockOrientation).await?;
            let flipped = controller.toggle_clock_orientation().await?;
            println!("Clock {}", if flipped { "flipped" } else { "upright" });
        }
        Command::Pattern { pattern } => {
            let index = match pattern.trim().parse::<u32>() {
                Ok(index) => controller.set_pattern(index).await?,
                Err(_) => {
                    controller.refresh_patterns().await?;
                    controller.set_pattern_by_name(&pattern).await?
                }
            };
            let session = controller.snapshot().await;
            let name = session
                .selected_pattern
                .map(|entry| entry.name)
                .unwrap_or_else(|| index.to_string());
            println!("{}: {name}", session.status);
        }
        Command::SaveToken { .. }
        | Command::ForgetToken
        | Command::Devices
        | Command::Connect => {}
    }

    Ok(())
}

/// An explicit `--device` must be listed; otherwise the stored device wins.
async fn select_device(
    storage: &Storage,
    devices: &[DeviceSummary],
    requested: Option<String>,
) -> Result<DeviceSummary> {
    let device = match requested {
        Some(id) => {
            let id = DeviceId::new(id.trim());
            devices
                .iter()
                .find(|device| device.id == id)
                .with_context(|| format!("device {id} is not on this account"))?
        }
        None => {
            let last = storage.last_device_id().await?;
            choose_device(devices, last.as_ref()).context("no devices on this account")?
        }
    };
    storage.save_last_device_id(&device.id).await?;
    info!("panel: using device={}", device.id);
    Ok(device.clone())
}

fn print_devices(devices: &[DeviceSummary]) {
    if devices.is_empty() {
        println!("No devices.");
    }
    for device in devices {
        let state = if device.connected { "online" } else { "offline" };
        println!("{}  {}  {state}", device.id, device.display_name());
    }
}

fn print_session(session: &Session) {
    let Some(device) = &session.device else {
        println!("{}", session.status);
        return;
    };
    println!("device      {} ({})", device.display_name(), device.id);
    println!("power       {}", if session.power { "on" } else { "off" });
    println!("time zone   {}", session.timezone_offset);
    println!("brightness  {}", session.brightness);
    println!(
        "clock       {}",
        if session.clock_flipped { "flipped" } else { "upright" }
    );
    println!("color       {}", color::to_hex(session.color));
    println!(
        "noise       x={} y={} z={} scale={}",
        session.noise.speed_x, session.noise.speed_y, session.noise.speed_z, session.noise.scale
    );
    match &session.selected_pattern {
        Some(entry) => println!("pattern     {} ({})", entry.name, entry.index),
        None => println!("pattern     -"),
    }
    for (slot, status) in &session.slots {
        if let SlotStatus::Failed(message) = status {
            println!("failed      {slot:?}: {message}");
        }
    }
    println!("{}", session.status);
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Updated(session)) => debug!("panel: {}", session.status),
            Ok(SessionEvent::Progress {
                device, message, ..
            }) => {
                debug!("panel: device={device} {message}")
            }
            Ok(SessionEvent::StaleResponseDiscarded { device, generation }) => {
                debug!("panel: stale response device={device} generation={generation}")
            }
            Err(RecvError::Lagged(skipped)) => debug!("panel: skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
