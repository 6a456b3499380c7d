//! InfluxDB v2 write client used by the host build. One point per cycle,
//! shipped as line protocol over HTTP; a failed write is this cycle's
//! problem only.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use fluxtemp_common::{DataPoint, DeviceConfig};

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct InfluxWriter {
    agent: ureq::Agent,
    write_url: String,
    ping_url: String,
    auth_header: String,
}

impl InfluxWriter {
    /// Build a writer from the device config. Certificate validation is
    /// deliberately disabled: these devices sit on networks where the chain
    /// cannot be validated, and the deployment accepts endpoint
    /// reachability in place of chain-of-trust.
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .context("failed to build TLS connector")?;

        let agent = ureq::AgentBuilder::new()
            .tls_connector(Arc::new(tls))
            .timeout(WRITE_TIMEOUT)
            .build();

        let base = config.influx_url.trim_end_matches('/');
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ms",
            base,
            url_encode(&config.influx_org),
            url_encode(&config.influx_bucket),
        );

        Ok(Self {
            agent,
            write_url,
            ping_url: format!("{base}/ping"),
            auth_header: format!("Token {}", config.influx_token),
        })
    }

    /// Quick reachability probe against the server's ping endpoint.
    pub fn check_connection(&self) -> Result<()> {
        self.agent
            .get(&self.ping_url)
            .call()
            .map(|_| ())
            .map_err(|err| anyhow!("endpoint not reachable: {err}"))
    }

    pub fn write_point(&self, point: &DataPoint) -> Result<()> {
        let body = point.to_line_protocol();
        tracing::debug!("writing: {body}");

        match self
            .agent
            .post(&self.write_url)
            .set("Authorization", &self.auth_header)
            .set("Content-Type", "text/plain; charset=utf-8")
            .send_string(&body)
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                Err(anyhow!("write rejected with HTTP {code}: {detail}"))
            }
            Err(err) => Err(anyhow!("write failed: {err}")),
        }
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
