use color_eyre::{eyre::eyre, Result};
use shipcontroller::connection::{ConnectionState, MockRelay};
use shipcontroller::{AppConfig, ShipSession};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::default_path();
    let config = AppConfig::load_or_default(&config_path).await;
    info!("Using configuration {}", config_path.display());
    let poll_timeout = Duration::from_millis(
        config.connection.heartbeat_initial_delay_ms + config.connection.reconnect_interval_ms,
    ) * 2;

    let relay = MockRelay::new(true);
    let mut session = ShipSession::new(config, Arc::new(relay.clone()))?;
    spawn_presentation(&mut session);

    session.connect().await?;
    let mut state = session.subscribe_state();
    wait_for_state(&mut state, ConnectionState::ConnectedWithDevice, poll_timeout).await?;
    info!("Vessel room: {}", session.roster().display_id(&session.config().relay.device_id));

    session.start_control()?;
    run_sweep(&session).await;

    info!("Vessel leaves the room");
    relay.set_vessel_present(false);
    wait_for_state(&mut state, ConnectionState::Reconnecting, poll_timeout).await?;
    if !session.disconnect(false).await? {
        info!("Disconnect suppressed while waiting for the vessel");
    }

    info!("Vessel rejoins the room");
    relay.set_vessel_present(true);
    wait_for_state(&mut state, ConnectionState::ConnectedWithDevice, poll_timeout).await?;

    session.stop_control();
    info!("{}", session.performance_report());
    session.disconnect(true).await?;
    session.shutdown().await;

    info!(
        "Relay received {} motor frames, last {:?}",
        relay.frames().len(),
        relay.last_frame()
    );
    Ok(())
}

/// Forward, hard left, reversal through the interlock, release
async fn run_sweep(session: &ShipSession) {
    let mut samples = Vec::new();
    samples.extend((0..=10).map(|i| (0.0, i as f32 * 0.08)));
    samples.extend((0..=10).map(|i| (-(i as f32) * 0.09, 0.8 - i as f32 * 0.05)));
    samples.extend((0..15).map(|_| (0.0, -0.7)));
    samples.extend((0..5).map(|_| (0.0, 0.0)));

    let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
    for (x, y) in samples {
        interval.tick().await;
        session.update_joystick(x, y);
        debug!("Sample ({:.2}, {:.2}) -> {}", x, y, session.last_command());
    }
    interval.tick().await;
    info!("Sweep finished, idle = {}", session.is_idle());
}

async fn wait_for_state(
    state: &mut watch::Receiver<ConnectionState>,
    target: ConnectionState,
    limit: Duration,
) -> Result<()> {
    match tokio::time::timeout(limit, state.wait_for(|s| *s == target)).await {
        Ok(Ok(_)) => {
            info!("Connection state: {:?}", target);
            Ok(())
        }
        Ok(Err(e)) => Err(eyre!("Connection worker stopped: {}", e)),
        Err(_) => Err(eyre!("Timed out waiting for {:?}", target)),
    }
}

fn spawn_presentation(session: &mut ShipSession) {
    if let Some(mut notices) = session.take_notices() {
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                info!("Notice: {:?}", notice);
            }
        });
    }
    if let Some(mut haptics) = session.take_haptics() {
        tokio::spawn(async move {
            while let Some(pulse) = haptics.recv().await {
                debug!("Haptic {:?} for {:?}", pulse, pulse.duration());
            }
        });
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| Level::from_str(value.trim()).ok())
        .unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
