//! OCPP RPC Node - CLI for the protocol engine
//!
//! Runs either end of an OCPP 2.0.1 link for interop testing.
//!
//! # Usage
//!
//! ```bash
//! # CSMS accepting stations on ws://0.0.0.0:9000/ocpp/<station-id>
//! ocpp-rpc-node csms --listen 0.0.0.0:9000
//!
//! # Charging station dialing that CSMS
//! ocpp-rpc-node station --url ws://localhost:9000/ocpp --id EK3-001
//!
//! # More detail on the wire
//! ocpp-rpc-node --log-level debug station --id EK3-001
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use ocpp_rpc::types::{
    BootNotificationRequest, BootNotificationResponse, BootReason, ChargingStationInfo, CostUpdatedRequest,
    CostUpdatedResponse, GenericStatus, HeartbeatRequest, HeartbeatResponse, LogStatusNotificationRequest,
    LogStatusNotificationResponse, RegistrationStatus, SetMonitoringLevelRequest, SetMonitoringLevelResponse,
};
use ocpp_rpc::{profiles, ws, Dispatcher, Engine, EngineConfig, Registry, Role, WsConfig, WsTransport};
use rand::Rng;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// OCPP 2.0.1 RPC node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Seconds to wait for a call's reply
    #[arg(long, global = true, default_value = "30")]
    call_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a CSMS endpoint
    Csms(CsmsArgs),
    /// Run a charging station endpoint
    Station(StationArgs),
}

#[derive(ClapArgs, Debug)]
struct CsmsArgs {
    /// Address to accept stations on
    #[arg(long, default_value = "0.0.0.0:9000")]
    listen: String,

    /// Heartbeat interval handed to stations at boot, in seconds
    #[arg(long, default_value = "300")]
    heartbeat_interval: i32,
}

#[derive(ClapArgs, Debug)]
struct StationArgs {
    /// CSMS WebSocket URL (station id is appended)
    #[arg(long, default_value = "ws://localhost:9000/ocpp")]
    url: String,

    /// Station identity
    #[arg(long, default_value = "EK3-001")]
    id: String,

    /// Heartbeat interval in seconds, until the CSMS assigns one
    #[arg(long, default_value = "60")]
    heartbeat_interval: u64,

    /// Initial reconnect delay in seconds
    #[arg(long, default_value = "5")]
    reconnect_delay: u64,

    /// Reconnect delay cap in seconds
    #[arg(long, default_value = "300")]
    max_reconnect_delay: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let registry = Arc::new(profiles::standard_registry()?);
    let config = EngineConfig::default().with_call_timeout(Duration::from_secs(args.call_timeout));

    match args.command {
        Command::Csms(csms) => run_csms(csms, registry, config).await,
        Command::Station(station) => run_station(station, registry, config).await,
    }
}

async fn run_csms(
    args: CsmsArgs,
    registry: Arc<Registry>,
    config: EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let active = registry.profiles().join(", ");
    banner("CSMS", &[("Listen", args.listen.as_str()), ("Profiles", active.as_str())]);

    let interval = args.heartbeat_interval;
    let mut dispatcher = Dispatcher::new(Role::Csms, registry);
    dispatcher
        .on_request(move |station, req: BootNotificationRequest| async move {
            info!(
                connection_id = %station,
                vendor = %req.charging_station.vendor_name,
                model = %req.charging_station.model,
                reason = ?req.reason,
                "Station booted"
            );
            Ok(BootNotificationResponse {
                current_time: Utc::now(),
                interval,
                status: RegistrationStatus::Accepted,
                status_info: None,
                custom_data: None,
            })
        })?
        .on_request(|_, _: HeartbeatRequest| async {
            Ok(HeartbeatResponse {
                current_time: Utc::now(),
                custom_data: None,
            })
        })?
        .on_request(|station, req: LogStatusNotificationRequest| async move {
            info!(connection_id = %station, status = ?req.status, "Log upload status");
            Ok(LogStatusNotificationResponse::default())
        })?
        .on("DataTransfer", |station, req| async move {
            warn!(connection_id = %station, vendor = %req["vendorId"], "Unknown vendor data");
            Ok(json!({"status": "UnknownVendorId"}))
        })?;

    for action in ["NotifyEvent", "NotifyMonitoringReport", "NotifyCustomerInformation"] {
        dispatcher.on(action, move |station, _| async move {
            info!(connection_id = %station, action, "Report received");
            Ok(json!({}))
        })?;
    }

    for action in dispatcher.missing() {
        warn!(action, "No handler bound");
    }

    let transport = WsTransport::new(WsConfig::default());
    let engine = Engine::new(config, dispatcher, transport.clone());
    let listener = TcpListener::bind(&args.listen).await?;

    ws::serve(listener, engine, transport).await?;
    Ok(())
}

async fn run_station(
    args: StationArgs,
    registry: Arc<Registry>,
    config: EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    banner("Charging Station", &[("Station", args.id.as_str()), ("CSMS URL", args.url.as_str())]);

    let mut dispatcher = Dispatcher::new(Role::ChargingStation, registry);
    dispatcher
        .on_request(|_, req: CostUpdatedRequest| async move {
            info!(transaction_id = %req.transaction_id, total_cost = req.total_cost, "Cost updated");
            Ok(CostUpdatedResponse::default())
        })?
        .on_request(|_, req: SetMonitoringLevelRequest| async move {
            info!(severity = req.severity, "Monitoring level set");
            Ok(SetMonitoringLevelResponse {
                status: GenericStatus::Accepted,
                status_info: None,
                custom_data: None,
            })
        })?
        .on("Reset", |_, req| async move {
            info!(kind = %req["type"], "Reset requested");
            Ok(json!({"status": "Scheduled"}))
        })?;

    for action in dispatcher.missing() {
        warn!(action, "No handler bound");
    }

    let transport = WsTransport::new(WsConfig::default());
    let engine = Engine::new(config, dispatcher, transport.clone());

    let base_delay = Duration::from_secs(args.reconnect_delay);
    let max_delay = Duration::from_secs(args.max_reconnect_delay).max(base_delay);
    let mut reconnect_delay = base_delay;

    loop {
        info!("Connecting to CSMS: {}", args.url);

        match ws::connect(&args.url, &args.id, engine.clone(), transport.clone()).await {
            Ok(link) => {
                reconnect_delay = base_delay;
                run_session(&engine, &args, link).await;
                info!("Connection closed");
            }
            Err(e) => error!("Connection error: {}", e),
        }

        // Exponential backoff with jitter
        let jitter_ms = rand::thread_rng().gen_range(0..=reconnect_delay.as_millis() as u64 / 4);
        let wait = reconnect_delay + Duration::from_millis(jitter_ms);
        info!("Reconnecting in {:?}", wait);
        tokio::time::sleep(wait).await;
        reconnect_delay = std::cmp::min(reconnect_delay * 2, max_delay);
    }
}

/// Boot, then heartbeat until the link drops
async fn run_session(engine: &Engine, args: &StationArgs, mut link: tokio::task::JoinHandle<()>) {
    let boot = BootNotificationRequest {
        charging_station: ChargingStationInfo {
            model: "EK3-OCPP".to_string(),
            vendor_name: "Elektrokombinacija".to_string(),
            serial_number: None,
            firmware_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            custom_data: None,
        },
        reason: BootReason::PowerUp,
        custom_data: None,
    };

    let mut heartbeat = Duration::from_secs(args.heartbeat_interval.max(1));
    match engine.send_request(&args.id, &boot).await {
        Ok(response) => {
            info!(status = ?response.status, interval = response.interval, "Boot answered");
            if response.interval > 0 {
                heartbeat = Duration::from_secs(response.interval as u64);
            }
        }
        Err(e) => warn!("BootNotification failed: {}", e),
    }

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut link => break,
            _ = ticker.tick() => {
                match engine.send_request(&args.id, &HeartbeatRequest::default()).await {
                    Ok(response) => info!(current_time = %response.current_time, "Heartbeat"),
                    Err(e) => warn!("Heartbeat failed: {}", e),
                }
            }
        }
    }
}

fn banner(role: &str, rows: &[(&str, &str)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  OCPP RPC Node - {:<43} ║", role);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (label, value) in rows {
        println!("║  {:<9} {:<49} ║", format!("{}:", label), truncate(value, 49));
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
