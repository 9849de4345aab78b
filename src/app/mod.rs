use crate::config::Config;
use crate::model::{Inbound, TerminationReason};
use crate::orchestrator::{SessionFlow, SessionInput, SessionOrchestrator, SessionSettings};
use crate::playback::ClockTrackFactory;
use crate::resources::DirResources;
use crate::status::{new_status, StatusHandle};
use crate::transport::ProxyLink;
use rand::{distributions::Alphanumeric, Rng};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
    }

    let config = Config::load()?;
    let status = new_status();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if config.server.enabled {
        spawn_status_server(&config, status.clone(), shutdown_rx)?;
    }

    let mut orchestrator = build_orchestrator(&config, status);
    let proxy_addr = format!("{}:{}", config.proxy.host, config.proxy.port);
    tracing::info!(
        app_name = %config.app.name,
        proxy = %proxy_addr,
        track = %config.playback.track_name,
        "hmi session bridge starting"
    );

    let interrupted = tokio::select! {
        _ = run_sessions(&config, &mut orchestrator) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        tracing::info!("shutdown: ctrl-c");
        orchestrator.shutdown();
    }
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn build_orchestrator(config: &Config, status: StatusHandle) -> SessionOrchestrator {
    SessionOrchestrator::new(
        SessionSettings::from_config(config),
        Arc::new(DirResources::new(&config.resources.dir)),
        Box::new(ClockTrackFactory {
            length: config.playback.track_duration(),
        }),
        status,
    )
}

fn spawn_status_server(
    config: &Config,
    status: StatusHandle,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("127.0.0.1:{}", config.server.port).parse()?;
    let token = config
        .server
        .token
        .clone()
        .unwrap_or_else(|| generate_token(32));
    println!(
        "Session status: http://127.0.0.1:{}/status?token={}",
        config.server.port, token
    );

    tokio::spawn(async move {
        if let Err(err) = crate::server::start(addr, token, status, shutdown_rx).await {
            tracing::warn!(error = %err, "status server stopped");
        }
    });
    Ok(())
}

/// Connects to the proxy, runs one session to its end, and reconnects with
/// exponential backoff. Never returns.
async fn run_sessions(config: &Config, orchestrator: &mut SessionOrchestrator) {
    let min_backoff_ms = config.proxy.reconnect_backoff_min_ms;
    let max_backoff_ms = config.proxy.reconnect_backoff_max_ms;
    let mut backoff_ms = min_backoff_ms;

    loop {
        let (tx, rx) = mpsc::unbounded_channel();
        match ProxyLink::connect(&config.proxy.host, config.proxy.port, &config.app, tx.clone())
            .await
        {
            Ok(link) => {
                orchestrator.begin(Box::new(link), tx);
                let (reason, reached_head_unit) = drive_session(orchestrator, rx).await;
                tracing::warn!(reason = %reason, "session over, reconnecting");
                if reached_head_unit {
                    backoff_ms = min_backoff_ms;
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    backoff_ms,
                    "proxy connect failed"
                );
            }
        }

        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = next_backoff(backoff_ms, max_backoff_ms);
    }
}

fn next_backoff(current_ms: u64, max_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_ms)
}

/// Feeds the session queue into the orchestrator until the session ends.
/// Also reports whether the head unit ever sent a status notification.
async fn drive_session(
    orchestrator: &mut SessionOrchestrator,
    mut rx: mpsc::UnboundedReceiver<SessionInput>,
) -> (TerminationReason, bool) {
    let mut reached_head_unit = false;
    loop {
        let input = rx.recv().await.unwrap_or(SessionInput::Inbound(Inbound::Terminated {
            reason: TerminationReason::TransportClosed,
        }));
        let flow = orchestrator.handle(input);
        reached_head_unit |= orchestrator.is_connected();
        if let SessionFlow::Ended(reason) = flow {
            return (reason, reached_head_unit);
        }
    }
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn generate_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
