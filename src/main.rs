//! Runs a caller and a callee against one in-memory store in a single
//! process, over real peer connections with silent capture.
//!
//! Usage: `duocall-loopback [config.json]`

use duocall::logger;
use duocall::{
    CallConfig, CallError, CallState, MemoryStore, RtcTransportFactory, SignalingController,
    SilenceSource,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const AUDIO_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let config = match std::env::args().nth(1) {
        Some(path) => match CallConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => CallConfig::default(),
    };
    logger::init(&config.log);

    let store = Arc::new(MemoryStore::new());
    let transports = Arc::new(RtcTransportFactory::new(config.ice_servers.clone()));
    let media = Arc::new(SilenceSource);

    let mut caller =
        SignalingController::new(store.clone(), transports.clone(), media.clone(), config.clone());
    let mut callee = SignalingController::new(store.clone(), transports, media, config);

    let result = run(&mut caller, &mut callee).await;

    let caller_stats = caller.stats();
    let callee_stats = callee.stats();
    caller.stop().await;
    callee.stop().await;
    store.shutdown();

    info!(?caller_stats, ?callee_stats, "loopback finished");
    match result {
        Ok(()) => {
            println!("loopback call connected");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "loopback call failed");
            eprintln!("loopback call failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    caller: &mut SignalingController,
    callee: &mut SignalingController,
) -> Result<(), CallError> {
    let call_id = caller.start_call().await?;
    info!(call_id = %call_id, "call started");
    callee.join_call(call_id.as_str()).await?;

    let mut caller_state = caller.watch_state();
    let mut callee_state = callee.watch_state();
    let both = async {
        tokio::try_join!(
            wait_connected(&mut caller_state),
            wait_connected(&mut callee_state)
        )
    };
    match tokio::time::timeout(CONNECT_TIMEOUT, both).await {
        Ok(connected) => connected?,
        Err(_) => {
            return Err(CallError::Signaling(format!(
                "peers did not connect within {CONNECT_TIMEOUT:?}"
            )))
        }
    };
    info!("both peers connected");

    if let Some(mut audio) = callee.take_remote_audio() {
        match tokio::time::timeout(AUDIO_TIMEOUT, audio.recv()).await {
            Ok(Some(track)) => info!(track = %track.track_id, "callee receives caller audio"),
            _ => warn!("no remote audio track reached the callee"),
        }
    }
    Ok(())
}

async fn wait_connected(state: &mut watch::Receiver<CallState>) -> Result<(), CallError> {
    let reached = *state
        .wait_for(|s| *s == CallState::Connected || s.is_terminal())
        .await
        .map_err(|_| CallError::Signaling("controller went away".into()))?;
    if reached == CallState::Connected {
        Ok(())
    } else {
        Err(CallError::InvalidState(reached.to_string()))
    }
}
