//! Setup portal pieces shared by the host and ESP front ends: the embedded
//! form page, the pre-fill payload, and submission validation.

use serde::Serialize;

use fluxtemp_common::provisioning::SetupSubmission;
use fluxtemp_common::DeviceConfig;

pub const SETUP_PORTAL_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Fluxtemp Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:640px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:10px;padding:1rem;margin-bottom:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input[type=text],input[type=password]{width:100%;padding:.5rem;box-sizing:border-box}
    .row{display:flex;gap:1rem}.row>div{flex:1}
    .muted{color:#555}.ok{color:#106010}.err{color:#a00000}
    button{padding:.55rem .9rem;margin-top:.8rem}
    p{margin:.35rem 0}
  </style>
</head>
<body>
  <h1 id="title">Fluxtemp Setup</h1>
  <p class="muted">Configure the network and the time-series database, then save. The device restarts with the new settings.</p>

  <div class="card">
    <h2>Network</h2>
    <label>WiFi SSID</label><input id="wifiSsid" type="text" maxlength="32">
    <label>WiFi Password (leave blank to keep current)</label><input id="wifiPass" type="password" maxlength="64">
  </div>

  <div class="card">
    <h2>Database</h2>
    <label>InfluxDB URL</label><input id="influxUrl" type="text" maxlength="100">
    <div class="row">
      <div><label>Organization</label><input id="influxOrg" type="text" maxlength="50"></div>
      <div><label>Bucket</label><input id="influxBucket" type="text" maxlength="50"></div>
    </div>
    <label>Token</label><input id="influxToken" type="text" maxlength="100">
    <div class="row">
      <div><label>Measurement Name</label><input id="measurementName" type="text" maxlength="50"></div>
      <div><label>Device Location</label><input id="location" type="text" maxlength="50"></div>
    </div>
    <label>Configuration PIN</label><input id="setupPin" type="text" maxlength="20">
  </div>

  <div class="card">
    <h2>Field Names</h2>
    <div class="row">
      <div><label>Temperature</label><input id="fieldTemperature" type="text" maxlength="50"></div>
      <div><label>Humidity</label><input id="fieldHumidity" type="text" maxlength="50"></div>
    </div>
    <div class="row">
      <div><label>Heat Index</label><input id="fieldHeatIndex" type="text" maxlength="50"></div>
      <div><label>Dew Point</label><input id="fieldDewPoint" type="text" maxlength="50"></div>
    </div>
    <label>Pressure</label><input id="fieldPressure" type="text" maxlength="50">
  </div>

  <button id="save">Save &amp; Restart</button>
  <button id="restart">Restart Without Saving</button>
  <p id="status" class="muted"></p>

  <script>
    const q=(id)=>document.getElementById(id);
    const FIELDS=["wifiSsid","influxUrl","influxOrg","influxBucket","influxToken",
      "measurementName","location","setupPin","fieldTemperature","fieldHumidity",
      "fieldHeatIndex","fieldDewPoint","fieldPressure"];

    async function api(path,opt){
      const r=await fetch(path,opt);let b={};
      try{b=await r.json();}catch(_){}
      if(!r.ok)throw new Error(b.error||('Request failed: '+r.status));
      return b;
    }

    async function load(){
      const c=await api('/api/config');
      if(c.deviceId)q('title').textContent=c.deviceId+' Setup';
      for(const f of FIELDS)if(c[f]!=null)q(f).value=c[f];
    }

    q('save').addEventListener('click', async ()=>{
      q('status').className='muted'; q('status').textContent='Saving...';
      try{
        const payload={};
        for(const f of FIELDS)payload[f]=q(f).value;
        if(q('wifiPass').value)payload.wifiPass=q('wifiPass').value;
        await api('/api/config',{method:'PUT',headers:{'content-type':'application/json'},body:JSON.stringify(payload)});
        q('status').className='ok'; q('status').textContent='Saved. The device is restarting.';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });

    q('restart').addEventListener('click', async ()=>{
      q('status').className='muted'; q('status').textContent='Restarting...';
      try{await api('/api/restart',{method:'POST'});q('status').className='ok';q('status').textContent='Restart requested.';}
      catch(err){q('status').className='err';q('status').textContent=err.message;}
    });

    load().catch((err)=>{q('status').className='err';q('status').textContent=err.message;});
  </script>
</body>
</html>
"#;

/// Pre-fill payload for the form. Every config entry is exposed with its
/// current value so a submit round-trips unchanged fields verbatim.
#[derive(Debug, Serialize)]
pub struct ConfigView {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: Option<String>,
    #[serde(rename = "influxUrl")]
    pub influx_url: String,
    #[serde(rename = "influxOrg")]
    pub influx_org: String,
    #[serde(rename = "influxBucket")]
    pub influx_bucket: String,
    #[serde(rename = "influxToken")]
    pub influx_token: String,
    #[serde(rename = "measurementName")]
    pub measurement: String,
    pub location: String,
    #[serde(rename = "setupPin")]
    pub setup_pin: String,
    #[serde(rename = "fieldTemperature")]
    pub field_temperature: String,
    #[serde(rename = "fieldHumidity")]
    pub field_humidity: String,
    #[serde(rename = "fieldHeatIndex")]
    pub field_heat_index: String,
    #[serde(rename = "fieldDewPoint")]
    pub field_dew_point: String,
    #[serde(rename = "fieldPressure")]
    pub field_pressure: String,
}

impl ConfigView {
    pub fn new(device_id: &str, wifi_ssid: Option<String>, config: &DeviceConfig) -> Self {
        Self {
            device_id: device_id.to_string(),
            wifi_ssid,
            influx_url: config.influx_url.clone(),
            influx_org: config.influx_org.clone(),
            influx_bucket: config.influx_bucket.clone(),
            influx_token: config.influx_token.clone(),
            measurement: config.measurement.clone(),
            location: config.location.clone(),
            setup_pin: config.setup_pin.clone(),
            field_temperature: config.fields.temperature.clone(),
            field_humidity: config.fields.humidity.clone(),
            field_heat_index: config.fields.heat_index.clone(),
            field_dew_point: config.fields.dew_point.clone(),
            field_pressure: config.fields.pressure.clone(),
        }
    }
}

pub fn validate_submission(submission: &SetupSubmission) -> Result<(), &'static str> {
    let url = submission.influx_url.trim();
    if url.is_empty() {
        return Err("influxUrl cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err("influxUrl must start with http:// or https://");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(url: &str) -> SetupSubmission {
        SetupSubmission {
            influx_url: url.to_string(),
            ..SetupSubmission::default()
        }
    }

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_submission(&submission("https://db.example")).is_ok());
        assert!(validate_submission(&submission("http://10.0.0.5:8086")).is_ok());
    }

    #[test]
    fn rejects_blank_or_schemeless_urls() {
        assert!(validate_submission(&submission("")).is_err());
        assert!(validate_submission(&submission("db.example")).is_err());
    }

    #[test]
    fn view_round_trips_into_a_submission_shape() {
        let config = DeviceConfig {
            influx_token: "abc".to_string(),
            ..DeviceConfig::default()
        };
        let view = ConfigView::new("FLUXTEMP-0012ABCD", Some("homenet".to_string()), &config);

        let raw = serde_json::to_string(&view).unwrap();
        let parsed: SetupSubmission = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed.wifi_ssid.as_deref(), Some("homenet"));
        assert_eq!(parsed.influx_token, "abc");
        assert_eq!(parsed.measurement, config.measurement);
        assert_eq!(parsed.field_temperature, "temperature");
    }
}
