//! CLI parsing and the on-disk host-config file. Loading configuration from
//! the environment is an external concern, but writing `CONFIG_OUTPUT_FILE`
//! is a direct effect of handling a `config` reply and lives in the core.

use crate::error::{Error, Result};
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "collect-agent",
    about = "Maintains a TLS WebSocket session with the listener and reports telemetry"
)]
pub struct Cli {
    /// Listener hostname or IP address
    pub address: String,
    /// Listener TCP port
    pub port: u16,
    /// Network interface whose MAC address is used as the login identity
    pub wlan_if: String,
    /// Pre-shared collection key
    pub key: String,
    pub hardware_make: String,
    pub hardware_model: String,
    pub hardware_model_number: String,
    pub hardware_cpu_info: String,
    pub hardware_serial: String,
    /// Build date, Unix seconds
    pub os_build_date: i64,
    pub firmware: String,
    /// PEM bundle of trusted CA certificates
    pub root_cert_path: PathBuf,
    /// Where the host subtree of a successful `config` reply is persisted
    pub config_output_file: PathBuf,
    /// Base sender-loop interval in seconds, used as `configured_fast_delay`
    pub update_delay: i64,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub login_mac: String,
    pub collect_key: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
}

#[derive(Debug, Clone)]
pub struct CapabilityFlags {
    pub webshell_support: bool,
    pub bandwidth_test_support: bool,
    pub firmware_upgrade_support: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub client_info: String,
    pub hardware_make: String,
    pub hardware_model: String,
    pub hardware_model_number: String,
    pub hardware_cpu_info: String,
    pub hardware_serial: String,
    pub fw: String,
    pub os_build_date: i64,
    pub hostname: String,
    pub os_version: String,
    pub capability_flags: CapabilityFlags,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub identity: Identity,
    pub device_profile: DeviceProfile,
    pub root_cert_path: PathBuf,
    pub host_config_path: PathBuf,
    pub configured_fast_delay: i64,
}

impl AgentConfig {
    pub fn from_cli(cli: Cli, login_mac: String, timeout_cmd_available: bool) -> Self {
        let identity = Identity {
            login_mac,
            collect_key: cli.key,
            endpoint_host: cli.address,
            endpoint_port: cli.port,
        };

        let hostname = hostname_or_unknown();
        let uname = uname_release_or_unknown();

        let device_profile = DeviceProfile {
            client_info: format!("{}/{}", cli.hardware_make, cli.hardware_model),
            hardware_make: cli.hardware_make,
            hardware_model: cli.hardware_model,
            hardware_model_number: cli.hardware_model_number,
            hardware_cpu_info: cli.hardware_cpu_info,
            hardware_serial: cli.hardware_serial,
            fw: cli.firmware,
            os_build_date: cli.os_build_date,
            hostname,
            os_version: uname,
            capability_flags: CapabilityFlags {
                webshell_support: timeout_cmd_available,
                bandwidth_test_support: false,
                firmware_upgrade_support: false,
            },
        };

        Self {
            identity,
            device_profile,
            root_cert_path: cli.root_cert_path,
            host_config_path: cli.config_output_file,
            configured_fast_delay: cli.update_delay,
        }
    }
}

fn hostname_or_unknown() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(_) => "unknown".to_string(),
    }
}

fn uname_release_or_unknown() -> String {
    match nix::sys::utsname::uname() {
        Ok(info) => info.release().to_string_lossy().into_owned(),
        Err(_) => "unknown".to_string(),
    }
}

/// Reads the MAC address of `iface` from `/sys/class/net/<iface>/address`,
/// the same source the reference agent reads via `SIOCGIFHWADDR`.
pub fn read_interface_mac(iface: &str) -> Result<String> {
    let path = format!("/sys/class/net/{}/address", iface);
    let raw = std::fs::read_to_string(&path)?;
    Ok(raw.trim().to_string())
}

/// Atomically persists `host` (the `client.host` subtree of a `config`
/// reply) to `path`: write to a sibling temp file, then rename over the
/// target so a crash never leaves a half-written config on disk.
pub fn persist_host_config(path: &Path, host: &Value) -> Result<()> {
    let pretty = serde_json::to_string_pretty(host)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, pretty)
        .map_err(|e| Error::ConfigPersistFailed(format!("write {}: {}", tmp_path.display(), e)))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::ConfigPersistFailed(format!("rename into {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn persist_host_config_writes_pretty_json_atomically() {
        let dir = std::env::temp_dir().join(format!("collect-agent-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("host.json");

        let host = json!({"updateIntervalSeconds": 30, "outageIntervalSeconds": 120});
        persist_host_config(&path, &host).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["updateIntervalSeconds"], 30);
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
