//! Application context owning the transport, control and connection services
//!
//! Nothing here is global: every service is constructed by [`ShipSession::new`]
//! and torn down by [`ShipSession::shutdown`].

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::connection::{
    ConnectionError, ConnectionHandle, ConnectionNotice, ConnectionState, LinkConnector,
    RoomSnapshot, Transport, TransportAdapter, TransportError,
};
use crate::controller::{
    ControlCommand, ControlError, ControlHandle, ControlSettings, FilterKind, HapticPulse,
    HapticSink,
};
use crate::protocol::CommandEncoder;

const HAPTIC_BUFFER: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct ShipSession {
    config: AppConfig,
    transport: Arc<TransportAdapter>,
    control: ControlHandle,
    connection: ConnectionHandle,
    haptics: Option<mpsc::Receiver<HapticPulse>>,
}

impl ShipSession {
    /// Wires all services over `connector`. Must be called inside a runtime.
    pub fn new(config: AppConfig, connector: Arc<dyn LinkConnector>) -> Result<Self, SessionError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::NoRuntime(e.to_string()))?;

        let transport = Arc::new(TransportAdapter::new(connector));
        let events = transport.subscribe()?;

        let (haptic_tx, haptic_rx) = mpsc::channel(HAPTIC_BUFFER);
        let haptics = HapticSink::new(haptic_tx, config.control.haptics_enabled);

        let shared_transport: Arc<dyn Transport> = transport.clone();
        let control = ControlHandle::new(
            config.control.clone(),
            Arc::clone(&shared_transport),
            Arc::new(CommandEncoder::default()),
            haptics,
        );
        let connection =
            ConnectionHandle::spawn(config.connection_settings(), shared_transport, events);

        info!("Session ready for {}", config.relay.url);
        Ok(Self {
            config,
            transport,
            control,
            connection,
            haptics: Some(haptic_rx),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Connects to the configured relay url
    pub async fn connect(&self) -> Result<(), SessionError> {
        let url = self.config.relay.url.clone();
        self.connect_to(&url).await
    }

    pub async fn connect_to(&self, url: &str) -> Result<(), SessionError> {
        self.connection.connect(url).await?;
        Ok(())
    }

    /// `Ok(false)` when suppressed by an active reconnect loop
    pub async fn disconnect(&self, force: bool) -> Result<bool, SessionError> {
        Ok(self.connection.disconnect(force).await?)
    }

    pub fn start_control(&self) -> Result<(), SessionError> {
        self.control.start()?;
        Ok(())
    }

    pub fn stop_control(&self) {
        self.control.stop();
    }

    pub fn update_joystick(&self, x: f32, y: f32) {
        self.control.update_sample(x, y);
    }

    pub fn force_send(&self) {
        self.control.force_send();
    }

    pub fn is_control_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn is_idle(&self) -> bool {
        self.control.is_idle()
    }

    pub fn last_command(&self) -> ControlCommand {
        self.control.last_command()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn transport_url(&self) -> Option<String> {
        self.transport.url()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn roster(&self) -> RoomSnapshot {
        self.connection.roster()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.connection.subscribe_status()
    }

    pub fn subscribe_roster(&self) -> watch::Receiver<RoomSnapshot> {
        self.connection.subscribe_roster()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn take_notices(&mut self) -> Option<mpsc::Receiver<ConnectionNotice>> {
        self.connection.take_notices()
    }

    pub fn take_haptics(&mut self) -> Option<mpsc::Receiver<HapticPulse>> {
        self.haptics.take()
    }

    pub fn settings(&self) -> ControlSettings {
        self.control.settings()
    }

    pub fn set_filter(&self, filter: FilterKind, alpha: f32) -> Result<(), SessionError> {
        self.control.set_filter(filter, alpha)?;
        Ok(())
    }

    pub fn set_direction_change_delay(&self, millis: u64) -> u64 {
        self.control.set_direction_change_delay(millis)
    }

    pub fn set_haptics_enabled(&self, enabled: bool) {
        self.control.set_haptics_enabled(enabled);
    }

    pub fn clear_caches(&self) {
        self.control.clear_caches();
    }

    pub fn performance_report(&self) -> String {
        self.control.performance_report()
    }

    pub fn reset_performance(&self) {
        self.control.reset_performance();
    }

    /// Writes the configuration with the live control settings to `path`
    pub async fn save_settings(&mut self, path: &Path) -> Result<(), SessionError> {
        self.config.control = self.control.settings();
        self.config.save(path).await?;
        Ok(())
    }

    /// Stops control with a final zero command, then closes the connection
    pub async fn shutdown(&mut self) {
        info!("Shutting down session");
        self.control.stop();
        self.connection.shutdown().await;
        self.transport.unsubscribe();
        if self.transport.is_connected() {
            warn!("Transport still connected after shutdown, closing");
            self.transport.disconnect();
        }
        debug!("Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockRelay;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn session(relay: &MockRelay) -> ShipSession {
        ShipSession::new(AppConfig::default(), Arc::new(relay.clone())).unwrap()
    }

    #[test]
    fn requires_runtime() {
        let relay = MockRelay::default();
        assert!(matches!(
            ShipSession::new(AppConfig::default(), Arc::new(relay)),
            Err(SessionError::NoRuntime(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_vessel() {
        let relay = MockRelay::new(true);
        let mut session = session(&relay);
        let mut notices = session.take_notices().unwrap();
        assert!(session.take_notices().is_none());

        session.connect().await.unwrap();
        settle().await;

        assert!(session.is_connected());
        assert_eq!(session.connection_state(), ConnectionState::ConnectedWithDevice);
        assert_eq!(session.transport_url().as_deref(), Some("mock://relay"));
        assert_eq!(notices.recv().await, Some(ConnectionNotice::Connected));
        assert!(matches!(
            notices.recv().await,
            Some(ConnectionNotice::DeviceConnected { .. })
        ));
        session.shutdown().await;
        assert!(!session.transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_sends_final_zero() {
        let relay = MockRelay::new(true);
        let mut session = session(&relay);
        session.connect().await.unwrap();
        settle().await;

        session.start_control().unwrap();
        session.update_joystick(0.0, 0.8);
        settle().await;
        assert!(!session.is_idle());

        session.shutdown().await;
        settle().await;
        let last = relay.last_frame().map(ControlCommand::from);
        assert_eq!(last, Some(ControlCommand::zero()));
        assert!(!session.is_control_running());
    }

    #[tokio::test]
    async fn save_settings_persists_live_values() {
        let relay = MockRelay::default();
        let mut session = session(&relay);
        session.set_filter(FilterKind::Kalman, 0.4).unwrap();
        assert_eq!(session.set_direction_change_delay(500), 200);
        session.set_haptics_enabled(false);

        let path = std::env::temp_dir()
            .join(format!("shipcontroller-session-{}", std::process::id()))
            .join("config.toml");
        session.save_settings(&path).await.unwrap();

        let saved = AppConfig::load(&path).await.unwrap();
        assert_eq!(saved.control.filter, FilterKind::Kalman);
        assert_eq!(saved.control.direction_change_delay_ms, 200);
        assert!(!saved.control.haptics_enabled);
        session.shutdown().await;
    }
}
