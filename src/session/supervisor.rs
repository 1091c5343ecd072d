//! The top-level reconnect loop. Owns the TLS config and the agent's static
//! identity/profile; builds a fresh [`Session`] on every connection attempt
//! and tears it down fully before trying again.

use crate::command::timeout_util_available;
use crate::config::{AgentConfig, DeviceProfile, Identity};
use crate::error::Result;
use crate::handshake::perform_handshake;
use crate::session::pinger::{PingerLoop, DEFAULT_PING_HOSTS};
use crate::session::receiver::ReceiverLoop;
use crate::session::sender::SenderLoop;
use crate::session::{unix_now, Session};
use crate::stream::{FrameReader, FrameWriter};
use crate::tls;
use rustls::ClientConfig;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::split;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);
const EXIT_POLL: Duration = Duration::from_millis(200);

pub struct SessionSupervisor {
    identity: Identity,
    device_profile: DeviceProfile,
    configured_fast_delay: i64,
    host_config_path: std::path::PathBuf,
    client_config: Arc<ClientConfig>,
    exit_program: Arc<AtomicBool>,
    connection_failures: AtomicU32,
}

impl SessionSupervisor {
    pub fn new(agent_config: AgentConfig, exit_program: Arc<AtomicBool>) -> Result<Self> {
        let client_config = tls::build_client_config(Some(&agent_config.root_cert_path))?;
        Ok(Self {
            identity: agent_config.identity,
            device_profile: agent_config.device_profile,
            configured_fast_delay: agent_config.configured_fast_delay,
            host_config_path: agent_config.host_config_path,
            client_config,
            exit_program,
            connection_failures: AtomicU32::new(0),
        })
    }

    pub async fn run(&self) {
        while !self.exit_program.load(Ordering::SeqCst) {
            if let Err(e) = self.run_one_session().await {
                log::warn!("session ended: {e}");
            }
            self.connection_failures.fetch_add(1, Ordering::SeqCst);
            if self.exit_program.load(Ordering::SeqCst) {
                break;
            }
            sleep(RECONNECT_BACKOFF).await;
        }
    }

    async fn run_one_session(&self) -> Result<()> {
        let mut stream = tls::connect(
            self.client_config.clone(),
            &self.identity.endpoint_host,
            self.identity.endpoint_port,
        )
        .await?;

        perform_handshake(
            &mut stream,
            &self.identity.login_mac,
            &self.identity.collect_key,
            &self.identity.endpoint_host,
        )
        .await?;

        let has_timeout = timeout_util_available().await;
        let session = Arc::new(Session::new(
            self.identity.clone(),
            self.device_profile.clone(),
            self.configured_fast_delay,
            self.host_config_path.clone(),
            has_timeout,
            unix_now(),
        ));

        let (read_half, write_half) = split(stream);
        let reader = FrameReader::new(read_half);
        let writer = Arc::new(Mutex::new(FrameWriter::new(write_half)));

        let cancel = CancellationToken::new();

        let mut ping_hosts: Vec<String> = DEFAULT_PING_HOSTS.iter().map(|h| h.to_string()).collect();
        ping_hosts.push(self.identity.endpoint_host.clone());

        let sender = SenderLoop::new(session.clone(), writer.clone());
        let receiver = ReceiverLoop::new(session.clone(), reader, writer.clone());
        let pinger = PingerLoop::new(
            session.flags.clone(),
            session.ping_snapshot.clone(),
            ping_hosts,
            cancel.clone(),
        );

        let sender_handle = tokio::spawn(sender.run());
        let receiver_handle = tokio::spawn(receiver.run());
        let pinger_handle = tokio::spawn(pinger.run());

        let result = tokio::select! {
            r = sender_handle => r.unwrap_or(Ok(())),
            r = receiver_handle => r.unwrap_or(Ok(())),
            r = pinger_handle => r.unwrap_or(Ok(())),
            _ = wait_for_exit(&self.exit_program) => Ok(()),
        };

        session.flags.request_reconnect();
        cancel.cancel();

        let mut writer_guard = writer.lock().await;
        let _ = tokio::time::timeout(TEARDOWN_GRACE, writer_guard.close()).await;

        result
    }
}

/// Polls `exit_program`, resolving once the shutdown signal handler has set
/// it. Giving the per-session `select!` a branch on this flag is what lets a
/// SIGINT/SIGTERM interrupt an in-flight session in time to still run its
/// own teardown (the `writer_guard.close()` call above) instead of the
/// process just falling through `main` with no close frame sent.
async fn wait_for_exit(exit_program: &AtomicBool) {
    while !exit_program.load(Ordering::SeqCst) {
        sleep(EXIT_POLL).await;
    }
}
