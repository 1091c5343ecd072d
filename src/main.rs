use clap::Parser;
use collect_agent::command::timeout_util_available;
use collect_agent::config::{read_interface_mac, AgentConfig, Cli};
use collect_agent::session::supervisor::SessionSupervisor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();
    install_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(0);
        }
    };

    let login_mac = match read_interface_mac(&cli.wlan_if) {
        Ok(mac) => mac,
        Err(e) => {
            log::error!("could not read MAC address for {}: {e}", cli.wlan_if);
            std::process::exit(0);
        }
    };

    let has_timeout = timeout_util_available().await;
    let agent_config = AgentConfig::from_cli(cli, login_mac, has_timeout);

    log::info!(
        "starting session to {}:{}",
        agent_config.identity.endpoint_host,
        agent_config.identity.endpoint_port
    );

    let exit_program = Arc::new(AtomicBool::new(false));
    let supervisor = match SessionSupervisor::new(agent_config, exit_program.clone()) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            log::error!("failed to initialize session supervisor: {e}");
            std::process::exit(1);
        }
    };

    let shutdown_flag = exit_program.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        log::info!("shutdown signal received, finishing the in-flight session before exiting");
        shutdown_flag.store(true, Ordering::SeqCst);
    });

    supervisor.run().await;
}

/// `SIGSEGV` has no safe recovery in Rust; the closest reachable analog of
/// the reference agent's "catch and log" behavior is a panic hook that logs
/// before the process aborts, plus graceful handling of INT/TERM.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        log::error!("panic: {info}");
    }));
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
