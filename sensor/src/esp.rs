use std::ffi::CString;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::{AnyIOPin, IOPin, Input, InputOutput, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use fluxtemp_common::{
    build_cycle_point,
    provisioning::{
        portal_timeout, BootPath, ProvisioningController, ProvisioningOutcome, SetupConclusion,
        SetupExit, SetupReason, SetupSubmission,
    },
    status::{Fault, StatusSignal, BLINK_INTERVAL, FAULT_PATTERN_GAP},
    store::ConfigStore,
    DataPoint, DeviceConfig, SensorSample, UptimeCounter,
};

use crate::portal::{validate_submission, ConfigView, SETUP_PORTAL_HTML};

const LOOP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[cfg(feature = "sensor-dht")]
const DHT_PIN: i32 = 16;

const STORAGE_BASE_PATH: &str = "/spiffs";
const STORAGE_PARTITION: &str = "storage";

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const MAX_HTTP_BODY: usize = 4096;
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// OS connectivity probes that must all land on the form for the portal to
// behave captively.
const CAPTIVE_PROBE_PATHS: [&str; 7] = [
    "/",
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

enum WifiStartup {
    Connected(EspWifi<'static>),
    Provisioning {
        wifi: EspWifi<'static>,
        stored_ssid: Option<String>,
    },
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let device = fluxtemp_common::device_id(chip_id());
    info!("{device} starting");

    let mut led = StatusLed::new(pins.gpio2.downgrade())?;
    led.on();

    if let Err(err) = mount_storage() {
        log::error!("storage mount failed: {err:#}");
        info!("boot outcome: {:?}", ProvisioningOutcome::Failed(Fault::Storage));
        led.halt(Fault::Storage);
    }
    let store = match ConfigStore::open(STORAGE_BASE_PATH) {
        Ok(store) => store,
        Err(err) => {
            log::error!("config store unavailable: {err}");
            led.halt(Fault::Storage);
        }
    };
    let loaded = match store.load() {
        Ok(loaded) => loaded,
        Err(err) => {
            log::error!("config store unreadable: {err}");
            led.halt(Fault::Storage);
        }
    };

    let mut setup_trigger = SetupTrigger::new(pins.gpio13.downgrade())?;
    let manual_setup = setup_trigger.sampled_at_boot();

    let mut sensors = match init_sensors(
        pins.gpio16.downgrade(),
        peripherals.i2c0,
        pins.gpio21.downgrade(),
        pins.gpio22.downgrade(),
    ) {
        Ok(sensors) => sensors,
        Err(err) => {
            log::error!("sensor bus init failed: {err:#}");
            info!("boot outcome: {:?}", ProvisioningOutcome::Failed(Fault::SensorInit));
            led.halt(Fault::SensorInit);
        }
    };

    let mut controller = ProvisioningController::new(loaded, manual_setup);

    let wifi = match controller.boot_path() {
        BootPath::InteractiveSetup(reason) => {
            info!(
                "boot outcome: {:?}",
                ProvisioningOutcome::EnteredSetup(reason)
            );
            let (mut wifi, stored_ssid) =
                start_access_point(peripherals.modem, sys_loop, nvs_partition, &device)?;
            run_setup(
                &mut wifi,
                &mut controller,
                reason,
                &device,
                stored_ssid,
                &store,
                &mut led,
            )?;
            unreachable!("setup always ends in a restart");
        }
        BootPath::DirectConnect => {
            match connect_station(peripherals.modem, sys_loop, nvs_partition, &device)? {
                WifiStartup::Connected(wifi) => {
                    info!(
                        "boot outcome: {:?}",
                        ProvisioningOutcome::ConfiguredAndConnected
                    );
                    wifi
                }
                WifiStartup::Provisioning {
                    mut wifi,
                    stored_ssid,
                } => {
                    let reason = SetupReason::ConnectFailed;
                    info!(
                        "boot outcome: {:?}",
                        ProvisioningOutcome::EnteredSetup(reason)
                    );
                    run_setup(
                        &mut wifi,
                        &mut controller,
                        reason,
                        &device,
                        stored_ssid,
                        &store,
                        &mut led,
                    )?;
                    unreachable!("setup always ends in a restart");
                }
            }
        }
    };
    // Keep the station alive for the program lifetime.
    let _wifi = wifi;

    info!("configuration PIN: {}", controller.config().setup_pin);

    let writer = EspInfluxWriter::from_config(controller.config());
    match writer.check_connection() {
        Ok(()) => info!("connected to {}", controller.config().influx_url),
        Err(err) => warn!("endpoint check failed: {err:#}"),
    }

    led.off();

    let mut uptime = UptimeCounter::new();
    let started = Instant::now();

    loop {
        led.signal(StatusSignal::MeasureTick);

        let sample = sensors.read().sanitized();
        if sensor_read_incomplete(&sample) {
            warn!("sensor read incomplete this cycle");
            led.signal(StatusSignal::SensorReadError);
        }

        let (ssid, rssi) = station_link();
        let uptime_ms = uptime.update(started.elapsed().as_millis() as u32);
        let point = build_cycle_point(
            controller.config(),
            &device,
            &ssid,
            rssi,
            uptime_ms,
            sample,
        );

        if let Err(err) = writer.write_point(&point) {
            warn!("publish failed, retrying next cycle: {err:#}");
            led.signal(StatusSignal::PublishError);
        }

        // Sleep in one-second slices so the setup trigger stays responsive;
        // a debounced press is consumed at the cycle boundary.
        let mut restart_requested = false;
        for _ in 0..LOOP_INTERVAL.as_secs() {
            if setup_trigger.poll() {
                restart_requested = true;
            }
            thread::sleep(Duration::from_secs(1));
        }
        if restart_requested {
            restart_device("setup trigger pressed");
        }
    }
}

/// Block in the portal until the session concludes, then persist (or not)
/// and restart. Station credentials go to the radio's own storage; the
/// config record never holds them.
fn run_setup(
    wifi: &mut EspWifi<'static>,
    controller: &mut ProvisioningController,
    reason: SetupReason,
    device: &str,
    stored_ssid: Option<String>,
    store: &ConfigStore,
    led: &mut StatusLed,
) -> anyhow::Result<()> {
    let submission_slot: Arc<Mutex<Option<SetupSubmission>>> = Arc::new(Mutex::new(None));
    let _server = create_portal_server(
        device,
        controller.config(),
        stored_ssid,
        submission_slot.clone(),
    )?;

    let deadline = portal_timeout(reason).map(|limit| Instant::now() + limit);
    info!("waiting for setup on AP `{device}`");

    let exit = loop {
        thread::sleep(Duration::from_secs(1));

        if let Some(submission) = submission_slot.lock().unwrap().take() {
            break SetupExit::Submitted(submission);
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                info!("setup portal timed out");
                break SetupExit::TimedOut;
            }
        }
    };

    let station = match &exit {
        SetupExit::Submitted(submission) => submission
            .wifi_ssid
            .clone()
            .filter(|ssid| !ssid.trim().is_empty())
            .map(|ssid| (ssid, submission.wifi_pass.clone().unwrap_or_default())),
        SetupExit::TimedOut => None,
    };

    match controller.conclude_setup(exit) {
        SetupConclusion::SaveAndRestart => {
            if let Some((ssid, password)) = station {
                if let Err(err) = persist_station_config(wifi, &ssid, &password) {
                    warn!("failed to store station credentials: {err:#}");
                }
            }
            if let Err(err) = store.save(controller.config()) {
                log::error!("failed to persist configuration: {err}");
                led.halt(Fault::Storage);
            }
            info!("configuration saved");
            restart_device("new configuration takes effect on a clean boot")
        }
        SetupConclusion::RestartWithoutSaving => restart_device("setup ended without changes"),
    }
}

fn create_portal_server(
    device: &str,
    config: &DeviceConfig,
    stored_ssid: Option<String>,
    submission_slot: Arc<Mutex<Option<SetupSubmission>>>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    for path in CAPTIVE_PROBE_PATHS {
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(SETUP_PORTAL_HTML.as_bytes())?;
            Ok(())
        })?;
    }

    {
        let device = device.to_string();
        let config = config.clone();
        server.fn_handler::<anyhow::Error, _>("/api/config", Method::Get, move |req| {
            let view = ConfigView::new(&device, stored_ssid.clone(), &config);
            write_json(req, &view)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/config", Method::Put, move |mut req| {
        let body = read_request_body(&mut req)?;
        let submission: SetupSubmission =
            serde_json::from_slice(&body).context("invalid config payload")?;

        if let Err(message) = validate_submission(&submission) {
            return write_error(req, 400, message);
        }

        *submission_slot.lock().unwrap() = Some(submission);
        write_json(req, &serde_json::json!({ "saved": true }))
    })?;

    server.fn_handler::<anyhow::Error, _>("/api/restart", Method::Post, move |req| {
        thread::Builder::new()
            .name("restart-request".into())
            .spawn(|| {
                thread::sleep(Duration::from_millis(500));
                unsafe { esp_idf_svc::sys::esp_restart() };
            })
            .expect("failed to spawn restart thread");

        write_json(req, &serde_json::json!({ "restarting": true }))
    })?;

    Ok(server)
}

fn connect_station(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    device: &str,
) -> anyhow::Result<WifiStartup> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let stored = match wifi.get_configuration()? {
        Configuration::Client(client) if !client.ssid.is_empty() => client,
        _ => {
            warn!("no stored station credentials; starting provisioning AP");
            start_access_point_on(&mut wifi, device)?;
            return Ok(WifiStartup::Provisioning {
                wifi: esp_wifi,
                stored_ssid: None,
            });
        }
    };
    let stored_ssid = stored.ssid.as_str().to_string();

    wifi.set_configuration(&Configuration::Client(stored.clone()))?;
    wifi.start()?;
    info!("wifi started, connecting to `{stored_ssid}`");

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    last_err = None;
                    break;
                }
                Err(err) => {
                    warn!("wifi netif up failed on attempt {attempt}: {err:#}");
                    last_err = Some(err);
                }
            },
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(WifiStartup::Connected(esp_wifi)),
        Some(err) => {
            warn!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; last error: {err:#}");
            let _ = wifi.disconnect();
            let _ = wifi.stop();
            start_access_point_on(&mut wifi, device)?;
            Ok(WifiStartup::Provisioning {
                wifi: esp_wifi,
                stored_ssid: Some(stored_ssid),
            })
        }
    }
}

fn start_access_point(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    device: &str,
) -> anyhow::Result<(EspWifi<'static>, Option<String>)> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let stored_ssid = match wifi.get_configuration() {
        Ok(Configuration::Client(client)) if !client.ssid.is_empty() => {
            Some(client.ssid.as_str().to_string())
        }
        _ => None,
    };

    start_access_point_on(&mut wifi, device)?;
    Ok((esp_wifi, stored_ssid))
}

/// The portal AP is open, named after the device so the user can tell units
/// apart; it only exists for the duration of the setup session.
fn start_access_point_on(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    device: &str,
) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: device
            .try_into()
            .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
        auth_method: AuthMethod::None,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("provisioning AP `{device}` started");
    Ok(())
}

fn persist_station_config(
    wifi: &mut EspWifi<'static>,
    ssid: &str,
    password: &str,
) -> anyhow::Result<()> {
    let auth_method = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;
    Ok(())
}

struct EspInfluxWriter {
    write_url: String,
    ping_url: String,
    auth_header: String,
}

impl EspInfluxWriter {
    fn from_config(config: &DeviceConfig) -> Self {
        let base = config.influx_url.trim_end_matches('/');
        Self {
            write_url: format!(
                "{}/api/v2/write?org={}&bucket={}&precision=ms",
                base,
                url_encode(&config.influx_org),
                url_encode(&config.influx_bucket),
            ),
            ping_url: format!("{base}/ping"),
            auth_header: format!("Token {}", config.influx_token),
        }
    }

    fn check_connection(&self) -> anyhow::Result<()> {
        let mut client = self.client()?;
        let request = client.request(Method::Get, &self.ping_url, &[])?;
        let response = request.submit().map_err(|err| anyhow!("{err:?}"))?;
        let status = response.status();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(anyhow!("ping answered HTTP {status}"))
        }
    }

    fn write_point(&self, point: &DataPoint) -> anyhow::Result<()> {
        let body = point.to_line_protocol();
        log::debug!("writing: {body}");

        let mut client = self.client()?;
        let headers = [
            ("Authorization", self.auth_header.as_str()),
            ("Content-Type", "text/plain; charset=utf-8"),
        ];
        let mut request = client.request(Method::Post, &self.write_url, &headers)?;
        request.write_all(body.as_bytes())?;
        let response = request.submit().map_err(|err| anyhow!("{err:?}"))?;

        let status = response.status();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(anyhow!("write rejected with HTTP {status}"))
        }
    }

    fn client(&self) -> anyhow::Result<HttpClient<EspHttpConnection>> {
        // No certificate bundle is attached: the deployment accepts endpoint
        // reachability in place of chain-of-trust validation.
        let conf = HttpClientConfiguration {
            timeout: Some(WRITE_TIMEOUT),
            ..Default::default()
        };
        Ok(HttpClient::wrap(EspHttpConnection::new(&conf)?))
    }
}

struct SensorSuite {
    #[cfg(feature = "sensor-dht")]
    dht_pin: PinDriver<'static, AnyIOPin, InputOutput>,
    #[cfg(feature = "sensor-bmp280")]
    bmp: bme280::i2c::BME280<esp_idf_hal::i2c::I2cDriver<'static>>,
    delay: Ets,
}

/// Bring up the enabled sensor buses. Any failure here is fatal: a device
/// that cannot read its sensors at boot is mis-assembled, not transient.
fn init_sensors(
    dht_pin: AnyIOPin,
    i2c0: esp_idf_hal::i2c::I2C0,
    sda: AnyIOPin,
    scl: AnyIOPin,
) -> anyhow::Result<SensorSuite> {
    #[cfg(not(feature = "sensor-dht"))]
    let _ = dht_pin;
    #[cfg(not(feature = "sensor-bmp280"))]
    let _ = (i2c0, sda, scl);

    #[cfg(feature = "sensor-dht")]
    let dht_pin = {
        let mut pin = PinDriver::input_output_od(dht_pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        pin
    };

    #[cfg(feature = "sensor-bmp280")]
    let bmp = {
        let i2c = esp_idf_hal::i2c::I2cDriver::new(
            i2c0,
            sda,
            scl,
            &esp_idf_hal::i2c::config::Config::new(),
        )?;
        let mut delay = Ets;
        let mut bmp = bme280::i2c::BME280::new_primary(i2c);
        bmp.init(&mut delay)
            .map_err(|err| anyhow!("BMP280 init failed: {err:?}"))?;
        bmp
    };

    Ok(SensorSuite {
        #[cfg(feature = "sensor-dht")]
        dht_pin,
        #[cfg(feature = "sensor-bmp280")]
        bmp,
        delay: Ets,
    })
}

impl SensorSuite {
    fn read(&mut self) -> SensorSample {
        let mut sample = SensorSample::default();

        #[cfg(feature = "sensor-dht")]
        match dht_sensor::dht22::blocking::read(&mut self.delay, &mut self.dht_pin) {
            Ok(reading) => {
                sample.temperature_c = Some(reading.temperature);
                sample.humidity_pct = Some(reading.relative_humidity);
            }
            Err(err) => {
                warn!("DHT read failed on GPIO{DHT_PIN}: {err:?}");
            }
        }

        #[cfg(feature = "sensor-bmp280")]
        match self.bmp.measure(&mut self.delay) {
            Ok(measurements) => {
                sample.pressure_hpa = Some(measurements.pressure / 100.0);
                if sample.temperature_c.is_none() {
                    sample.temperature_c = Some(measurements.temperature);
                }
            }
            Err(err) => {
                warn!("BMP280 read failed: {err:?}");
            }
        }

        sample
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

struct SetupTrigger {
    pin: PinDriver<'static, AnyIOPin, Input>,
    boot_sample: bool,
    pressed_streak: u8,
}

impl SetupTrigger {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;
        let boot_sample = pin.is_low();
        Ok(Self {
            pin,
            boot_sample,
            pressed_streak: 0,
        })
    }

    fn sampled_at_boot(&self) -> bool {
        self.boot_sample
    }

    /// Debounced poll: true once the line has been held low for three
    /// consecutive one-second samples.
    fn poll(&mut self) -> bool {
        if self.pin.is_low() {
            self.pressed_streak = self.pressed_streak.saturating_add(1);
        } else {
            self.pressed_streak = 0;
        }
        self.pressed_streak >= 3
    }
}

struct StatusLed {
    pin: PinDriver<'static, AnyIOPin, Output>,
}

impl StatusLed {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        Ok(Self {
            pin: PinDriver::output(pin)?,
        })
    }

    fn on(&mut self) {
        let _ = self.pin.set_high();
    }

    fn off(&mut self) {
        let _ = self.pin.set_low();
    }

    fn signal(&mut self, signal: StatusSignal) {
        self.blink(signal.blink_count());
    }

    fn blink(&mut self, count: u8) {
        for _ in 0..count {
            let _ = self.pin.set_high();
            thread::sleep(BLINK_INTERVAL);
            let _ = self.pin.set_low();
            thread::sleep(BLINK_INTERVAL);
        }
    }

    /// Fatal faults repeat their pattern until the device is power-cycled.
    fn halt(&mut self, fault: Fault) -> ! {
        log::error!("fatal: {fault}");
        loop {
            self.blink(fault.blink_count());
            thread::sleep(FAULT_PATTERN_GAP);
        }
    }
}

fn mount_storage() -> anyhow::Result<()> {
    use esp_idf_svc::sys;

    let base_path = CString::new(STORAGE_BASE_PATH)?;
    let partition_label = CString::new(STORAGE_PARTITION)?;
    let conf = sys::esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: partition_label.as_ptr(),
        max_files: 4,
        format_if_mount_failed: true,
    };

    let rc = unsafe { sys::esp_vfs_spiffs_register(&conf) };
    if rc == sys::ESP_OK {
        Ok(())
    } else {
        Err(anyhow!("esp_vfs_spiffs_register failed with code {rc}"))
    }
}

fn chip_id() -> u32 {
    let mut mac = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]])
}

/// SSID and RSSI of the currently associated access point; blank/zero when
/// the station is not associated.
fn station_link() -> (String, i32) {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    if rc != esp_idf_svc::sys::ESP_OK {
        return (String::new(), 0);
    }

    let len = ap_info
        .ssid
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(ap_info.ssid.len());
    let ssid = String::from_utf8_lossy(&ap_info.ssid[..len]).into_owned();
    (ssid, i32::from(ap_info.rssi))
}

fn restart_device(reason: &str) -> ! {
    info!("restarting: {reason}");
    thread::sleep(Duration::from_millis(500));
    unsafe { esp_idf_svc::sys::esp_restart() };
    // esp_restart does not return.
    loop {
        thread::sleep(Duration::from_secs(1));
    }
}

fn url_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}
