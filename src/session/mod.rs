//! The session engine: the reconnect supervisor, the three concurrent
//! loops, and the shared state they coordinate through.

pub mod cadence;
pub mod pinger;
pub mod receiver;
pub mod sender;
pub mod supervisor;

use crate::command::CommandRunner;
use crate::config::{DeviceProfile, Identity};
use crate::session::cadence::CadenceController;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

pub use crate::config::Identity as SessionIdentity;

/// Cross-loop signals and counters. Single-writer per field; every field is
/// either an atomic scalar or, for `cadence`, a small mutex-guarded struct
/// (see [`cadence::CadenceController`]).
pub struct SharedFlags {
    pub force_reconnect: AtomicBool,
    pub send_config_request: AtomicBool,
    pub send_loop_errors: AtomicU32,
    /// Unix seconds of the last frame received from the peer.
    pub last_response_at: AtomicI64,
    /// `i64::MIN` stands in for "no config change observed yet".
    pub last_config_change_ts_ms: AtomicI64,
    /// Released by the sender loop once per tick to tell the pinger a fresh
    /// snapshot is wanted.
    pub ping_cycle_requested: AtomicBool,
}

impl SharedFlags {
    pub fn new(now: i64) -> Self {
        Self {
            force_reconnect: AtomicBool::new(false),
            send_config_request: AtomicBool::new(false),
            send_loop_errors: AtomicU32::new(0),
            last_response_at: AtomicI64::new(now),
            last_config_change_ts_ms: AtomicI64::new(i64::MIN),
            ping_cycle_requested: AtomicBool::new(true),
        }
    }

    pub fn mark_response(&self, now: i64) {
        self.last_response_at.store(now, Ordering::SeqCst);
    }

    pub fn request_reconnect(&self) {
        self.force_reconnect.store(true, Ordering::SeqCst);
    }

    pub fn should_reconnect(&self) -> bool {
        self.force_reconnect.load(Ordering::SeqCst)
    }
}

/// The JSON snapshot the pinger loop publishes and the sender loop reads,
/// pointer-swapped so readers only ever see a complete string.
pub struct PingSnapshot {
    inner: ArcSwap<String>,
}

impl PingSnapshot {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee("[]".to_string()),
        }
    }

    pub fn publish(&self, json_text: String) {
        self.inner.store(Arc::new(json_text));
    }

    pub fn load(&self) -> Arc<str> {
        Arc::from(self.inner.load_full().as_str())
    }
}

/// Everything the three loops need, bound to the lifetime of one connected
/// session. A fresh `Session` is built on every reconnect attempt; it never
/// outlives a single `SessionSupervisor` iteration.
pub struct Session {
    pub identity: Identity,
    pub device_profile: DeviceProfile,
    pub cadence: CadenceController,
    pub flags: Arc<SharedFlags>,
    pub ping_snapshot: Arc<PingSnapshot>,
    pub command_runner: CommandRunner,
    pub host_config_path: std::path::PathBuf,
}

impl Session {
    pub fn new(
        identity: Identity,
        device_profile: DeviceProfile,
        configured_fast_delay: i64,
        host_config_path: std::path::PathBuf,
        has_timeout_util: bool,
        now: i64,
    ) -> Self {
        Self {
            identity,
            device_profile,
            cadence: CadenceController::new(configured_fast_delay),
            flags: Arc::new(SharedFlags::new(now)),
            ping_snapshot: Arc::new(PingSnapshot::new()),
            command_runner: CommandRunner::new(has_timeout_util),
            host_config_path,
        }
    }
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Minimal fixtures shared by the loop tests in `sender`/`receiver`/
/// `supervisor`, so every end-to-end test isn't hand-rolling its own
/// `Identity`/`DeviceProfile`.
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::config::{CapabilityFlags, DeviceProfile, Identity};

    pub fn identity() -> Identity {
        Identity {
            login_mac: "aa:bb:cc:dd:ee:ff".to_string(),
            collect_key: "test-key".to_string(),
            endpoint_host: "listener.example".to_string(),
            endpoint_port: 443,
        }
    }

    pub fn device_profile() -> DeviceProfile {
        DeviceProfile {
            client_info: "acme/widget".to_string(),
            hardware_make: "acme".to_string(),
            hardware_model: "widget".to_string(),
            hardware_model_number: "1".to_string(),
            hardware_cpu_info: "generic".to_string(),
            hardware_serial: "000".to_string(),
            fw: "1.0.0".to_string(),
            os_build_date: 0,
            hostname: "test-host".to_string(),
            os_version: "1.0".to_string(),
            capability_flags: CapabilityFlags {
                webshell_support: false,
                bandwidth_test_support: false,
                firmware_upgrade_support: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_snapshot_publish_then_load_round_trips() {
        let snap = PingSnapshot::new();
        snap.publish(r#"[{"host":"1.1.1.1"}]"#.to_string());
        assert_eq!(&*snap.load(), r#"[{"host":"1.1.1.1"}]"#);
    }

    #[test]
    fn shared_flags_start_clear() {
        let flags = SharedFlags::new(100);
        assert!(!flags.should_reconnect());
        assert_eq!(flags.last_response_at.load(Ordering::SeqCst), 100);
    }
}
