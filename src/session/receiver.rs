//! Reads frames sequentially and dispatches by message type. The only
//! consumer of the read half; the only other writer of `cmd` reply frames
//! besides the sender loop's `update`/`config` traffic.

use crate::error::Result;
use crate::frame::OpCode;
use crate::messages::{CmdReply, IncomingMessage};
use crate::session::{unix_now, Session};
use crate::stream::{FrameReader, FrameWriter};
use crate::{command, config as agent_config};
use base64::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

pub struct ReceiverLoop<R, W> {
    session: Arc<Session>,
    reader: FrameReader<R>,
    writer: Arc<Mutex<FrameWriter<W>>>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> ReceiverLoop<R, W> {
    pub fn new(session: Arc<Session>, reader: FrameReader<R>, writer: Arc<Mutex<FrameWriter<W>>>) -> Self {
        Self {
            session,
            reader,
            writer,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            if self.session.flags.should_reconnect() {
                return Ok(());
            }

            let frame = match self.reader.read_frame().await {
                Ok(frame) => frame,
                Err(_) => {
                    self.session.flags.request_reconnect();
                    return Ok(());
                }
            };

            self.session.flags.mark_response(unix_now());

            match frame.opcode {
                OpCode::Text => {
                    if let Err(()) = self.handle_text(&frame.payload).await {
                        self.session.flags.request_reconnect();
                        return Ok(());
                    }
                }
                OpCode::Ping => {
                    let mut writer = self.writer.lock().await;
                    let _ = writer.write_frame(OpCode::Pong, &frame.payload).await;
                }
                OpCode::Close => {
                    self.session.flags.request_reconnect();
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    async fn handle_text(&mut self, payload: &[u8]) -> std::result::Result<(), ()> {
        let message: IncomingMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(_) => return Err(()),
        };

        match message {
            IncomingMessage::Error(err) => {
                log::warn!("listener reported an error: {:?}", err.message);
                Err(())
            }
            IncomingMessage::Config(config) => {
                self.handle_config(config).await;
                Ok(())
            }
            IncomingMessage::Update(update) => {
                self.handle_update(update).await;
                Ok(())
            }
            IncomingMessage::Cmd(cmd) => {
                self.handle_cmd(cmd).await;
                Ok(())
            }
        }
    }

    async fn handle_config(&self, config: crate::messages::ConfigResponse) {
        if !config.client.authed {
            return;
        }

        if let Err(e) =
            agent_config::persist_host_config(&self.session.host_config_path, &config.client.host)
        {
            log::error!("failed to persist host config: {e}");
            self.session.flags.request_reconnect();
            return;
        }

        if let Some(ts) = config.client.host.get("lastConfigChangeTsMs").and_then(|v| v.as_i64()) {
            self.session
                .flags
                .last_config_change_ts_ms
                .store(ts, Ordering::SeqCst);
        }

        let update_interval = config
            .client
            .host
            .get("updateIntervalSeconds")
            .and_then(|v| v.as_i64());
        let outage_interval = config
            .client
            .host
            .get("outageIntervalSeconds")
            .and_then(|v| v.as_i64());
        self.session
            .cadence
            .apply_config_intervals(update_interval, outage_interval);

        if config
            .client
            .host
            .get("reboot")
            .and_then(|v| v.as_i64())
            .map(|v| v == 1)
            .unwrap_or(false)
        {
            reboot_host();
        }
    }

    async fn handle_update(&self, update: crate::messages::UpdateResponse) {
        if let Some(ts) = update.last_config_change_ts_ms {
            let stored = self
                .session
                .flags
                .last_config_change_ts_ms
                .load(Ordering::SeqCst);
            if stored != i64::MIN && ts != stored {
                self.session
                    .flags
                    .send_config_request
                    .store(true, Ordering::SeqCst);
            }
        }

        self.session.cadence.apply(&update);
    }

    async fn handle_cmd(&self, cmd: crate::messages::CmdRequest) {
        let output = match self.session.command_runner.run(&cmd.cmd).await {
            Ok(output) => output,
            Err(e) => command::CommandOutput {
                stdout_b64: String::new(),
                stderr_b64: base64::prelude::BASE64_STANDARD.encode(e.to_string()),
            },
        };

        let reply = CmdReply {
            kind: "cmd",
            uuidv4: cmd.uuidv4,
            stdout: output.stdout_b64,
            stderr: output.stderr_b64,
            ws_id: cmd.ws_id,
        };

        if let Ok(payload) = serde_json::to_vec(&reply) {
            let mut writer = self.writer.lock().await;
            let _ = writer.write_frame(OpCode::Text, &payload).await;
        }
    }
}

#[cfg(unix)]
fn reboot_host() {
    let _ = nix::unistd::sync();
    log::warn!("host config requested a reboot; invoking nix::sys::reboot::reboot");
    let _ = nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT);
}

#[cfg(not(unix))]
fn reboot_host() {
    log::warn!("reboot requested but not supported on this platform");
}
