//! The only producer of `update`/`config` frames, driven by a coarse 500 ms
//! tick and the cadence controller's `update_wait`.

use crate::collectors;
use crate::error::Result;
use crate::frame::OpCode;
use crate::messages::{Collectors, ConfigRequest, UpdateMessage};
use crate::session::{unix_now, Session};
use crate::stream::FrameWriter;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::time::sleep;

const TICK: Duration = Duration::from_millis(500);
const MAX_SEND_ERRORS: u32 = 4;

pub struct SenderLoop<W> {
    session: Arc<Session>,
    writer: Arc<Mutex<FrameWriter<W>>>,
}

impl<W: AsyncWrite + Unpin> SenderLoop<W> {
    pub fn new(session: Arc<Session>, writer: Arc<Mutex<FrameWriter<W>>>) -> Self {
        Self { session, writer }
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let cadence = self.session.cadence.snapshot();
            let iteration_start = unix_now();

            loop {
                if self.session.flags.should_reconnect() {
                    return Ok(());
                }
                if unix_now() - iteration_start >= cadence.update_wait {
                    break;
                }
                sleep(TICK).await;
            }

            let last_response_at = self.session.flags.last_response_at.load(Ordering::SeqCst);
            if unix_now() - last_response_at >= 4 * cadence.update_wait.max(1) {
                self.session.flags.request_reconnect();
                return Ok(());
            }

            if self
                .session
                .flags
                .send_config_request
                .swap(false, Ordering::SeqCst)
            {
                if self.send_config().await.is_err() {
                    self.bump_error_count_and_maybe_exit().await;
                    continue;
                }
            }

            self.session
                .flags
                .ping_cycle_requested
                .store(true, Ordering::SeqCst);

            if self.send_update().await.is_err() {
                if self.bump_error_count_and_maybe_exit().await {
                    return Ok(());
                }
            }
        }
    }

    async fn bump_error_count_and_maybe_exit(&self) -> bool {
        let errors = self.session.flags.send_loop_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if errors > MAX_SEND_ERRORS {
            self.session.flags.request_reconnect();
            true
        } else {
            false
        }
    }

    async fn send_config(&self) -> Result<()> {
        let profile = &self.session.device_profile;
        let request = ConfigRequest {
            kind: "config",
            client_info: profile.client_info.clone(),
            os: "linux".to_string(),
            os_version: profile.os_version.clone(),
            hardware_make: profile.hardware_make.clone(),
            hardware_model: profile.hardware_model.clone(),
            hardware_model_number: profile.hardware_model_number.clone(),
            hardware_cpu_info: profile.hardware_cpu_info.clone(),
            hardware_serial_number: profile.hardware_serial.clone(),
            os_build_date: profile.os_build_date,
            fw: profile.fw.clone(),
            hostname: profile.hostname.clone(),
            webshell_support: profile.capability_flags.webshell_support,
            bandwidth_test_support: profile.capability_flags.bandwidth_test_support,
            firmware_upgrade_support: profile.capability_flags.firmware_upgrade_support,
        };
        let payload = serde_json::to_vec(&request)?;
        let mut writer = self.writer.lock().await;
        writer.write_frame(OpCode::Text, &payload).await
    }

    async fn send_update(&self) -> Result<()> {
        let include_collectors = self.session.cadence.take_send_col_data();
        let collectors = include_collectors.then(|| {
            let ping_text = self.session.ping_snapshot.load();
            let ping: Value =
                serde_json::from_str(&ping_text).unwrap_or_else(|_| Value::Array(vec![]));
            Collectors {
                wap: collectors::collect_wap(),
                ping,
                system: collectors::collect_system(),
                interface: collectors::collect_interface(),
            }
        });

        let message = UpdateMessage {
            kind: "update",
            uptime: sysinfo::System::uptime(),
            wan_ip: local_wan_ip(),
            collectors,
        };
        let payload = serde_json::to_vec(&message)?;
        let mut writer = self.writer.lock().await;
        writer.write_frame(OpCode::Text, &payload).await
    }
}

/// Best-effort local outbound IPv4 address, derived by asking the kernel
/// which interface would be used to reach a public address without sending
/// any packets.
fn local_wan_ip() -> String {
    use std::net::UdpSocket;
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("1.1.1.1:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "0.0.0.0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fixtures;
    use crate::stream::FrameWriter;
    use std::time::Duration as StdDuration;
    use tokio::io::split;

    #[tokio::test]
    async fn stale_peer_forces_reconnect_and_exits_promptly() {
        let dir = std::env::temp_dir().join(format!("collect-agent-send-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let host_config_path = dir.join("host.json");

        let now = unix_now();
        let session = Arc::new(Session::new(
            fixtures::identity(),
            fixtures::device_profile(),
            5,
            host_config_path,
            false,
            now - 1000,
        ));

        let (client, server) = tokio::io::duplex(8192);
        let (_client_read, client_write) = split(client);
        let (_server_read, _server_write) = split(server);
        let writer = Arc::new(Mutex::new(FrameWriter::new(client_write)));

        let sender = SenderLoop::new(session.clone(), writer);
        let result = tokio::time::timeout(StdDuration::from_secs(5), sender.run()).await;

        assert!(result.is_ok(), "sender loop should return on its own once the peer goes stale");
        assert!(session.flags.should_reconnect());

        std::fs::remove_dir_all(&dir).ok();
    }
}
