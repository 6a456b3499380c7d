use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use fluxtemp_common::{
    device_id,
    provisioning::{
        portal_timeout, BootPath, ProvisioningController, ProvisioningOutcome, SetupConclusion,
        SetupExit, SetupReason, SetupSubmission,
    },
    status::{Fault, StatusSignal},
    store::{default_data_dir, ConfigStore},
    build_cycle_point, DeviceConfig, SensorSample, UptimeCounter,
};

use crate::influx::InfluxWriter;
use crate::portal::{validate_submission, ConfigView, SETUP_PORTAL_HTML};

const LOOP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DATA_DIR_ENV: &str = "FLUXTEMP_DATA_DIR";
const DATA_DIR_FALLBACK: &str = "./.fluxtemp";
const DEVICE_ID_ENV: &str = "FLUXTEMP_DEVICE_ID";
const FORCE_SETUP_ENV: &str = "FLUXTEMP_FORCE_SETUP";
const PORTAL_PORT_ENV: &str = "FLUXTEMP_PORTAL_PORT";
const DEFAULT_PORTAL_PORT: u16 = 8080;

// The host harness has no radio; the network tag and signal strength are
// fixed stand-ins so the published points keep their full shape.
const HOST_NETWORK_NAME: &str = "host";
const HOST_RSSI_DBM: i32 = -50;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let led = StatusLed;
    let data_dir = default_data_dir(DATA_DIR_ENV, DATA_DIR_FALLBACK);

    let store = match ConfigStore::open(data_dir.clone()) {
        Ok(store) => store,
        Err(err) => {
            error!("config storage unavailable at {}: {err}", data_dir.display());
            info!("boot outcome: {:?}", ProvisioningOutcome::Failed(Fault::Storage));
            led.halt(Fault::Storage);
        }
    };
    let loaded = match store.load() {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("config storage unreadable: {err}");
            info!("boot outcome: {:?}", ProvisioningOutcome::Failed(Fault::Storage));
            led.halt(Fault::Storage);
        }
    };

    let device = device_identity(&data_dir);
    let manual_setup = force_setup_requested();
    info!(
        "{device} starting (config {}loaded, data dir {})",
        if loaded.is_some() { "" } else { "not " },
        data_dir.display()
    );

    let mut controller = ProvisioningController::new(loaded, manual_setup);

    match controller.boot_path() {
        BootPath::InteractiveSetup(reason) => {
            info!("boot outcome: {:?}", ProvisioningOutcome::EnteredSetup(reason));
            run_setup(&mut controller, reason, &device, &store, &led).await
        }
        BootPath::DirectConnect => {
            let probe = tokio::task::spawn_blocking({
                let config = controller.config().clone();
                move || -> anyhow::Result<InfluxWriter> {
                    let writer = InfluxWriter::from_config(&config)?;
                    writer.check_connection()?;
                    Ok(writer)
                }
            })
            .await
            .context("connection probe task failed")?;

            match probe {
                Ok(writer) => {
                    info!("boot outcome: {:?}", ProvisioningOutcome::ConfiguredAndConnected);
                    info!("connected to {}", controller.config().influx_url);
                    info!("configuration PIN: {}", controller.config().setup_pin);
                    steady_state(&device, controller.config(), writer, &led).await
                }
                Err(err) => {
                    warn!("direct connect failed: {err:#}");
                    let reason = SetupReason::ConnectFailed;
                    info!("boot outcome: {:?}", ProvisioningOutcome::EnteredSetup(reason));
                    run_setup(&mut controller, reason, &device, &store, &led).await
                }
            }
        }
    }
}

/// Block in the portal until the session concludes, then persist (or not)
/// and restart. Every path out of setup goes through a restart; the new
/// record only ever takes effect from a clean boot.
async fn run_setup(
    controller: &mut ProvisioningController,
    reason: SetupReason,
    device: &str,
    store: &ConfigStore,
    led: &StatusLed,
) -> anyhow::Result<()> {
    let exit = run_setup_portal(device, controller.config(), portal_timeout(reason)).await?;

    match controller.conclude_setup(exit) {
        SetupConclusion::SaveAndRestart => {
            if let Err(err) = store.save(controller.config()) {
                error!("failed to persist configuration: {err}");
                led.halt(Fault::Storage);
            }
            info!("configuration saved");
            restart_device("new configuration takes effect on a clean boot")
        }
        SetupConclusion::RestartWithoutSaving => restart_device("setup ended without changes"),
    }
}

struct PortalState {
    device_id: String,
    config: DeviceConfig,
    submission: Mutex<Option<SetupSubmission>>,
    done: Notify,
}

/// Serve the setup portal until the form is submitted, a restart is
/// requested, or the timeout (fallback entry only) elapses.
async fn run_setup_portal(
    device: &str,
    config: &DeviceConfig,
    timeout: Option<Duration>,
) -> anyhow::Result<SetupExit> {
    let state = Arc::new(PortalState {
        device_id: device.to_string(),
        config: config.clone(),
        submission: Mutex::new(None),
        done: Notify::new(),
    });

    let app = Router::new()
        .route("/", get(handle_portal_page))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .route("/api/restart", post(handle_restart))
        .with_state(state.clone());

    let port = std::env::var(PORTAL_PORT_ENV)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORTAL_PORT);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind setup portal at {addr}"))?;
    info!("setup portal listening on http://{addr}");

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("setup portal server error: {err}");
        }
    });

    let concluded = match timeout {
        Some(limit) => tokio::time::timeout(limit, state.done.notified())
            .await
            .is_ok(),
        None => {
            state.done.notified().await;
            true
        }
    };

    // Let the final response reach the browser before tearing down.
    tokio::time::sleep(Duration::from_millis(500)).await;
    server.abort();

    if !concluded {
        info!("setup portal timed out");
        return Ok(SetupExit::TimedOut);
    }

    let submission = state.submission.lock().await.take();
    Ok(match submission {
        Some(submission) => SetupExit::Submitted(submission),
        // Restart requested without saving: same conclusion as a timeout.
        None => SetupExit::TimedOut,
    })
}

async fn handle_portal_page() -> Html<&'static str> {
    Html(SETUP_PORTAL_HTML)
}

async fn handle_get_config(State(state): State<Arc<PortalState>>) -> Json<ConfigView> {
    Json(ConfigView::new(&state.device_id, None, &state.config))
}

async fn handle_put_config(
    State(state): State<Arc<PortalState>>,
    Json(submission): Json<SetupSubmission>,
) -> axum::response::Response {
    if let Err(message) = validate_submission(&submission) {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    *state.submission.lock().await = Some(submission);
    state.done.notify_one();
    Json(serde_json::json!({ "saved": true })).into_response()
}

async fn handle_restart(State(state): State<Arc<PortalState>>) -> Json<serde_json::Value> {
    state.done.notify_one();
    Json(serde_json::json!({ "restarting": true }))
}

/// The fixed-period sampling loop: blink, read, publish, sleep. A failed
/// publish is logged and signalled, and the next cycle starts from scratch.
async fn steady_state(
    device: &str,
    config: &DeviceConfig,
    writer: InfluxWriter,
    led: &StatusLed,
) -> anyhow::Result<()> {
    let writer = Arc::new(writer);
    let mut uptime = UptimeCounter::new();
    let started = Instant::now();
    let mut interval = tokio::time::interval(LOOP_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        }

        led.signal(StatusSignal::MeasureTick);

        let sample = read_sensors(started.elapsed()).sanitized();
        if sensor_read_incomplete(&sample) {
            warn!("sensor read incomplete this cycle");
            led.signal(StatusSignal::SensorReadError);
        }

        let uptime_ms = uptime.update(started.elapsed().as_millis() as u32);
        let mut point = build_cycle_point(
            config,
            device,
            HOST_NETWORK_NAME,
            HOST_RSSI_DBM,
            uptime_ms,
            sample,
        );
        point.set_timestamp_ms(chrono::Utc::now().timestamp_millis());

        let write = {
            let writer = writer.clone();
            tokio::task::spawn_blocking(move || writer.write_point(&point)).await
        };
        match write {
            Ok(Ok(())) => debug!("cycle published"),
            Ok(Err(err)) => {
                warn!("publish failed, retrying next cycle: {err:#}");
                led.signal(StatusSignal::PublishError);
            }
            Err(err) => {
                warn!("publish task failed: {err}");
                led.signal(StatusSignal::PublishError);
            }
        }
    }
}

fn read_sensors(elapsed: Duration) -> SensorSample {
    // Hardware integration point: the ESP build reads the DHT/BMP280 buses
    // here. The host harness synthesizes a slow swing instead.
    let tick = elapsed.as_secs() / 60;
    SensorSample {
        temperature_c: cfg!(feature = "sensor-dht").then(|| 21.0 + (tick % 8) as f32 * 0.2),
        humidity_pct: cfg!(feature = "sensor-dht").then(|| 42.0 + (tick % 6) as f32 * 0.5),
        pressure_hpa: cfg!(feature = "sensor-bmp280").then(|| 1010.0 + (tick % 10) as f32 * 0.3),
    }
}

/// An enabled sensor that answered with less than its full quantity set
/// counts as a read error for signalling purposes.
fn sensor_read_incomplete(sample: &SensorSample) -> bool {
    let dht_missing = cfg!(feature = "sensor-dht")
        && (sample.temperature_c.is_none() || sample.humidity_pct.is_none());
    let bmp_missing = cfg!(feature = "sensor-bmp280") && sample.pressure_hpa.is_none();
    dht_missing || bmp_missing
}

fn force_setup_requested() -> bool {
    std::env::var(FORCE_SETUP_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Stable identity for this deployment: an explicit override, or a hash of
/// the data directory standing in for a chip id.
fn device_identity(data_dir: &Path) -> String {
    if let Ok(id) = std::env::var(DEVICE_ID_ENV) {
        return id;
    }
    let canonical = std::fs::canonicalize(data_dir).unwrap_or_else(|_| data_dir.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    device_id(hasher.finish() as u32)
}

/// Host analog of a device reboot: exit cleanly and let the supervisor
/// bring the process back up against the (possibly new) record.
fn restart_device(reason: &str) -> ! {
    info!("restarting: {reason}");
    std::process::exit(0);
}

struct StatusLed;

impl StatusLed {
    fn signal(&self, signal: StatusSignal) {
        debug!("status led: {} blink pair(s)", signal.blink_count());
    }

    /// Host analog of the fatal blink loop: no LED to blink, so report the
    /// pattern and stop with a non-zero status.
    fn halt(&self, fault: Fault) -> ! {
        error!(
            "fatal: {fault}; status led pattern is {} blink pair(s)",
            fault.blink_count()
        );
        std::process::exit(1);
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_sample_covers_enabled_sensors() {
        let sample = read_sensors(Duration::from_secs(120));
        #[cfg(feature = "sensor-dht")]
        {
            assert!(sample.temperature_c.is_some());
            assert!(sample.humidity_pct.is_some());
        }
        #[cfg(not(any(feature = "sensor-dht", feature = "sensor-bmp280")))]
        assert!(sample.is_empty());
    }

    #[test]
    fn complete_sample_is_not_flagged() {
        let sample = read_sensors(Duration::from_secs(60));
        assert!(!sensor_read_incomplete(&sample));
    }

    #[test]
    fn missing_quantity_is_flagged_when_a_sensor_is_enabled() {
        let empty = SensorSample::default();
        #[cfg(any(feature = "sensor-dht", feature = "sensor-bmp280"))]
        assert!(sensor_read_incomplete(&empty));
        #[cfg(not(any(feature = "sensor-dht", feature = "sensor-bmp280")))]
        assert!(!sensor_read_incomplete(&empty));
    }
}
