//! Wire types for the JSON payloads carried inside text frames. Field names
//! are the camelCase the listener expects, not idiomatic Rust, so every
//! struct carries explicit `rename`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ConfigRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "clientInfo")]
    pub client_info: String,
    pub os: String,
    #[serde(rename = "osVersion")]
    pub os_version: String,
    #[serde(rename = "hardwareMake")]
    pub hardware_make: String,
    #[serde(rename = "hardwareModel")]
    pub hardware_model: String,
    #[serde(rename = "hardwareModelNumber")]
    pub hardware_model_number: String,
    #[serde(rename = "hardwareCpuInfo")]
    pub hardware_cpu_info: String,
    #[serde(rename = "hardwareSerialNumber")]
    pub hardware_serial_number: String,
    #[serde(rename = "osBuildDate")]
    pub os_build_date: i64,
    pub fw: String,
    pub hostname: String,
    #[serde(rename = "webshellSupport")]
    pub webshell_support: bool,
    #[serde(rename = "bandwidthTestSupport")]
    pub bandwidth_test_support: bool,
    #[serde(rename = "firmwareUpgradeSupport")]
    pub firmware_upgrade_support: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Collectors {
    pub wap: Value,
    pub ping: Value,
    pub system: Value,
    pub interface: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uptime: u64,
    #[serde(rename = "wanIp")]
    pub wan_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collectors: Option<Collectors>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CmdReply {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub uuidv4: String,
    pub stdout: String,
    pub stderr: String,
    pub ws_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IncomingMessage {
    Error(ErrorPayload),
    Config(ConfigResponse),
    Update(UpdateResponse),
    Cmd(CmdRequest),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigResponse {
    pub client: ConfigClient,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigClient {
    #[serde(default)]
    pub authed: bool,
    #[serde(default)]
    pub host: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateResponse {
    #[serde(default, rename = "updateFast")]
    pub update_fast: bool,
    #[serde(default, rename = "lastUpdateOffsetSec")]
    pub last_update_offset_sec: i64,
    #[serde(default, rename = "lastColUpdateOffsetSec")]
    pub last_col_update_offset_sec: i64,
    #[serde(default, rename = "lastConfigChangeTsMs")]
    pub last_config_change_ts_ms: Option<i64>,
    #[serde(default, rename = "listenerUpdateIntervalSeconds")]
    pub listener_update_interval_seconds: Option<i64>,
    #[serde(default, rename = "listenerOutageIntervalSeconds")]
    pub listener_outage_interval_seconds: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmdRequest {
    pub cmd: String,
    pub uuidv4: String,
    pub ws_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_response_parses_authed_host() {
        let raw = r#"{"type":"config","client":{"authed":true,"host":{"updateIntervalSeconds":30,"outageIntervalSeconds":120,"lastConfigChangeTsMs":1000}}}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Config(cfg) => {
                assert!(cfg.client.authed);
                assert_eq!(cfg.client.host["updateIntervalSeconds"], 30);
            }
            _ => panic!("expected config message"),
        }
    }

    #[test]
    fn update_response_parses_defaults_when_fields_absent() {
        let raw = r#"{"type":"update","updateFast":true,"lastConfigChangeTsMs":1000}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Update(u) => {
                assert!(u.update_fast);
                assert_eq!(u.last_update_offset_sec, 0);
                assert_eq!(u.last_config_change_ts_ms, Some(1000));
            }
            _ => panic!("expected update message"),
        }
    }

    #[test]
    fn cmd_request_round_trips_reply_fields() {
        let raw = r#"{"type":"cmd","cmd":"echo hello","uuidv4":"u","ws_id":"w"}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Cmd(cmd) => {
                assert_eq!(cmd.cmd, "echo hello");
                assert_eq!(cmd.uuidv4, "u");
                assert_eq!(cmd.ws_id, "w");
            }
            _ => panic!("expected cmd message"),
        }
    }

    #[test]
    fn cmd_reply_serializes_with_expected_shape() {
        let reply = CmdReply {
            kind: "cmd",
            uuidv4: "u".into(),
            stdout: "aGVsbG8K".into(),
            stderr: String::new(),
            ws_id: "w".into(),
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "cmd");
        assert_eq!(value["stdout"], "aGVsbG8K");
        assert_eq!(value["stderr"], "");
    }
}
