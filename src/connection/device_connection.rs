//! Device connection state machine
//!
//! Owns the relay conversation: identity announcement, room assignment,
//! `room_info` polling, vessel presence and the reconnect loop. Every input
//! (transport events, timer ticks, requests from the handle) is processed
//! by one task, so the state below is never shared.
//!
//! ```text
//! Disconnected ──► Connecting ──► ConnectedIdentifying ──► ConnectedWaitingForDevice
//!      ▲                                                      │          ▲
//!      │ failure / disconnect                        vessel   ▼          │ vessel gone
//!      └──────────────────────────────── ConnectedWithDevice ◄──► Reconnecting
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection_handle::{ConnectionError, ConnectionNotice};
use super::roster::{RoomSnapshot, VESSEL_IDENTITY};
use super::transport::{Transport, TransportEvent};
use crate::protocol::{ClientEntry, IdentityAnnouncement, InboundMessage, RelayRequest};

pub const DEFAULT_DEVICE_ID: &str = "h832h9eh29h";
pub const DEFAULT_IDENTITY: &str = "MAIN_DEVICES";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    ConnectedIdentifying,
    ConnectedWaitingForDevice,
    ConnectedWithDevice,
    Reconnecting,
}

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub device_id: String,
    pub identity: String,
    pub vessel_identity: String,
    pub heartbeat_initial_delay: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            identity: DEFAULT_IDENTITY.to_string(),
            vessel_identity: VESSEL_IDENTITY.to_string(),
            heartbeat_initial_delay: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_POLL_INTERVAL,
            reconnect_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Heartbeat,
    Reconnect,
}

/// Everything the worker task reacts to besides transport events
#[derive(Debug)]
pub enum WorkerInput {
    Connect {
        url: String,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    Disconnect {
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    Poll {
        kind: PollKind,
        generation: u64,
    },
}

/// Cancellable repeating room query
///
/// Ticks are tagged with a generation so a tick already queued when the
/// timer is cancelled or re-armed is ignored.
#[derive(Debug)]
struct PollTimer {
    kind: PollKind,
    generation: u64,
    cancel: Option<CancellationToken>,
}

impl PollTimer {
    fn new(kind: PollKind) -> Self {
        Self {
            kind,
            generation: 0,
            cancel: None,
        }
    }

    fn arm(&mut self, initial: Duration, interval: Duration, inputs: &mpsc::Sender<WorkerInput>) {
        self.cancel();
        self.generation += 1;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let tx = inputs.clone();
        let (kind, generation) = (self.kind, self.generation);
        tokio::spawn(async move {
            let mut delay = initial;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(WorkerInput::Poll { kind, generation }).await.is_err() {
                    break;
                }
                delay = interval;
            }
            debug!("{:?} timer {} stopped", kind, generation);
        });

        self.cancel = Some(token);
        debug!("{:?} timer armed (generation {})", self.kind, self.generation);
    }

    fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(token) => {
                token.cancel();
                debug!("{:?} timer cancelled", self.kind);
                true
            }
            None => false,
        }
    }

    fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    fn accepts(&self, generation: u64) -> bool {
        self.is_active() && self.generation == generation
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Outputs the state machine publishes to presentation code
pub struct ConnectionOutputs {
    pub status: watch::Sender<bool>,
    pub roster: watch::Sender<RoomSnapshot>,
    pub state: watch::Sender<ConnectionState>,
    pub notices: mpsc::Sender<ConnectionNotice>,
}

pub struct DeviceConnection {
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    outputs: ConnectionOutputs,
    inputs: mpsc::Sender<WorkerInput>,
    state: ConnectionState,
    room_id: Option<String>,
    had_device: bool,
    heartbeat: PollTimer,
    reconnect: PollTimer,
}

impl DeviceConnection {
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        outputs: ConnectionOutputs,
        inputs: mpsc::Sender<WorkerInput>,
    ) -> Self {
        Self {
            settings,
            transport,
            outputs,
            inputs,
            state: ConnectionState::Disconnected,
            room_id: None,
            had_device: false,
            heartbeat: PollTimer::new(PollKind::Heartbeat),
            reconnect: PollTimer::new(PollKind::Reconnect),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn is_heartbeat_active(&self) -> bool {
        self.heartbeat.is_active()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnect.is_active()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state.clone();
            self.outputs.state.send_replace(state);
        }
    }

    fn set_status(&self, connected: bool) {
        self.outputs.status.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    fn notify(&self, notice: ConnectionNotice) {
        if let Err(e) = self.outputs.notices.try_send(notice) {
            debug!("Dropping connection notice: {}", e);
        }
    }

    fn send_text(&self, what: &str, text: Result<String, crate::protocol::ProtocolError>) -> bool {
        match text {
            Ok(json) => {
                debug!("Sending {}: {}", what, json);
                let sent = self.transport.send(&json);
                if !sent {
                    warn!("Failed to send {}", what);
                }
                sent
            }
            Err(e) => {
                error!("Failed to encode {}: {}", what, e);
                false
            }
        }
    }

    fn query_room(&self) -> bool {
        self.send_text("room query", RelayRequest::QueryRoom.to_json())
    }

    fn cancel_timers(&mut self) {
        self.heartbeat.cancel();
        self.reconnect.cancel();
    }

    pub fn handle_input(&mut self, input: WorkerInput) {
        match input {
            WorkerInput::Connect { url, reply } => {
                let result = self.connect(&url);
                let _ = reply.send(result);
            }
            WorkerInput::Disconnect { force, reply } => {
                let done = self.disconnect(force);
                let _ = reply.send(done);
            }
            WorkerInput::Poll { kind, generation } => self.on_poll(kind, generation),
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(message) => self.on_connected(&message),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Failure(reason) => self.on_failure(&reason),
            TransportEvent::Closed => self.on_failure("connection closed"),
        }
    }

    pub fn connect(&mut self, url: &str) -> Result<(), ConnectionError> {
        info!("Connecting to relay at {}", url);
        self.cancel_timers();
        self.had_device = false;
        self.room_id = None;
        self.set_state(ConnectionState::Connecting);
        // Failures also arrive as transport events and are handled there
        self.transport.connect(url).map_err(ConnectionError::from)
    }

    fn on_connected(&mut self, message: &str) {
        info!("Relay connection established");
        debug!("Acknowledgement: {}", message);
        self.set_status(true);
        self.notify(ConnectionNotice::Connected);

        let identity =
            IdentityAnnouncement::new(self.settings.device_id.clone(), self.settings.identity.clone());
        self.send_text("identity", identity.to_json());
        self.set_state(ConnectionState::ConnectedIdentifying);
    }

    fn on_message(&mut self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("Discarding relay message: {}", e);
                return;
            }
        };

        match message {
            InboundMessage::Room { room_id } => {
                info!("Assigned to room {}", room_id);
                self.room_id = Some(room_id);
                self.query_room();
                self.set_state(ConnectionState::ConnectedWaitingForDevice);
            }
            InboundMessage::RoomInfo {
                room_id,
                total_clients,
                clients,
            } => self.on_room_info(room_id, total_clients, &clients),
            InboundMessage::Connection { message } => {
                debug!("Relay connection message: {}", message);
            }
        }
    }

    fn on_room_info(&mut self, room_id: String, total_clients: u32, clients: &[ClientEntry]) {
        let snapshot = RoomSnapshot::from_room_info(
            &room_id,
            total_clients,
            clients,
            &self.settings.vessel_identity,
        );
        debug!(
            "Room {}: {} clients, {} vessel devices",
            room_id,
            total_clients,
            snapshot.devices.len()
        );
        self.room_id = Some(room_id.clone());
        self.outputs.roster.send_replace(snapshot.clone());

        if snapshot.has_vessel() {
            self.on_vessel_present(snapshot);
        } else {
            self.on_vessel_absent(room_id);
        }
    }

    fn on_vessel_present(&mut self, snapshot: RoomSnapshot) {
        if self.state == ConnectionState::ConnectedWithDevice {
            debug!("Vessel still present");
            return;
        }

        if self.had_device {
            info!("Vessel recovered in room {:?}", snapshot.room_id);
        } else {
            info!("Vessel detected in room {:?}", snapshot.room_id);
        }
        self.reconnect.cancel();
        self.had_device = true;
        self.set_status(true);
        self.notify(ConnectionNotice::DeviceConnected {
            room_id: snapshot.room_id.clone().unwrap_or_default(),
            summary: snapshot.summary(),
            devices: snapshot.devices,
        });
        self.heartbeat.arm(
            self.settings.heartbeat_initial_delay,
            self.settings.heartbeat_interval,
            &self.inputs,
        );
        self.set_state(ConnectionState::ConnectedWithDevice);
    }

    fn on_vessel_absent(&mut self, room_id: String) {
        self.heartbeat.cancel();
        if self.reconnect.is_active() {
            debug!("Vessel still absent from room {}", room_id);
            return;
        }
        self.notify(ConnectionNotice::WaitingForDevice {
            room_id: room_id.clone(),
        });

        if self.had_device {
            warn!("Vessel left room {}", room_id);
            self.set_status(false);
            self.set_state(ConnectionState::Reconnecting);
        } else {
            info!("Waiting for vessel in room {}", room_id);
            self.set_state(ConnectionState::ConnectedWaitingForDevice);
        }

        let interval = self.settings.reconnect_interval;
        self.reconnect.arm(interval, interval, &self.inputs);
    }

    fn on_poll(&mut self, kind: PollKind, generation: u64) {
        let timer = match kind {
            PollKind::Heartbeat => &self.heartbeat,
            PollKind::Reconnect => &self.reconnect,
        };
        if !timer.accepts(generation) {
            debug!("Ignoring stale {:?} tick", kind);
            return;
        }

        if !self.transport.is_connected() {
            warn!("{:?} tick while transport is closed, stopping timer", kind);
            match kind {
                PollKind::Heartbeat => self.heartbeat.cancel(),
                PollKind::Reconnect => self.reconnect.cancel(),
            };
            return;
        }

        debug!("{:?} tick, querying room", kind);
        self.query_room();
    }

    fn on_failure(&mut self, reason: &str) {
        error!("Relay connection lost: {}", reason);
        self.cancel_timers();
        self.had_device = false;
        self.set_status(false);
        self.set_state(ConnectionState::Disconnected);
        self.notify(ConnectionNotice::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Returns `false` when the disconnect was suppressed because the
    /// reconnect loop is running and `force` is not set.
    pub fn disconnect(&mut self, force: bool) -> bool {
        if self.reconnect.is_active() && !force {
            info!("Reconnect in progress, keeping connection open");
            return false;
        }

        self.cancel_timers();
        self.transport.disconnect();
        self.had_device = false;
        self.set_status(false);
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected from relay");
            self.set_state(ConnectionState::Disconnected);
            self.notify(ConnectionNotice::Disconnected {
                reason: "disconnected by request".to_string(),
            });
        }
        true
    }
}

/// Protocol worker loop; ends on cancellation or when the handle is dropped
pub async fn run_connection_worker(
    mut machine: DeviceConnection,
    mut inputs: mpsc::Receiver<WorkerInput>,
    mut events: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    info!("Connection worker started");
    let mut events_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Connection worker shutting down");
                break;
            }
            input = inputs.recv() => match input {
                Some(input) => machine.handle_input(input),
                None => break,
            },
            event = events.recv(), if events_open => match event {
                Some(event) => machine.handle_transport_event(event),
                None => {
                    warn!("Transport event stream ended");
                    events_open = false;
                }
            },
        }
    }
    machine.disconnect(true);
    info!("Connection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::TransportError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        connected: AtomicBool,
        disconnects: Mutex<usize>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        fn queries(&self) -> usize {
            self.sent().iter().filter(|s| s.contains("query_room")).count()
        }
    }

    impl Transport for RecordingTransport {
        fn connect(&self, url: &str) -> Result<(), TransportError> {
            if url.is_empty() {
                return Err(TransportError::EmptyUrl);
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, text: &str) -> bool {
            self.sent.lock().push(text.to_string());
            self.connected.load(Ordering::SeqCst)
        }

        fn disconnect(&self) {
            *self.disconnects.lock() += 1;
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        machine: DeviceConnection,
        transport: Arc<RecordingTransport>,
        inputs: mpsc::Receiver<WorkerInput>,
        notices: mpsc::Receiver<ConnectionNotice>,
        status: watch::Receiver<bool>,
        roster: watch::Receiver<RoomSnapshot>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(RecordingTransport::default());
        let (input_tx, inputs) = mpsc::channel(16);
        let (notice_tx, notices) = mpsc::channel(16);
        let (status_tx, status) = watch::channel(false);
        let (roster_tx, roster) = watch::channel(RoomSnapshot::default());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let machine = DeviceConnection::new(
            ConnectionSettings::default(),
            transport.clone(),
            ConnectionOutputs {
                status: status_tx,
                roster: roster_tx,
                state: state_tx,
                notices: notice_tx,
            },
            input_tx,
        );
        Fixture {
            machine,
            transport,
            inputs,
            notices,
            status,
            roster,
        }
    }

    fn room_info(vessels: &[&str]) -> TransportEvent {
        let mut clients = vec![ClientEntry {
            device_id: DEFAULT_DEVICE_ID.into(),
            identity: DEFAULT_IDENTITY.into(),
        }];
        clients.extend(vessels.iter().map(|id| ClientEntry {
            device_id: id.to_string(),
            identity: VESSEL_IDENTITY.into(),
        }));
        let msg = InboundMessage::RoomInfo {
            room_id: "r1".into(),
            total_clients: clients.len() as u32,
            clients,
        };
        TransportEvent::Message(msg.to_json().unwrap())
    }

    fn drain(rx: &mut mpsc::Receiver<ConnectionNotice>) -> Vec<ConnectionNotice> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn connected(f: &mut Fixture) {
        f.machine.connect("mock://relay").unwrap();
        f.machine
            .handle_transport_event(TransportEvent::Connected("ack".into()));
        f.machine.handle_transport_event(TransportEvent::Message(
            r#"{"type":"room","room_id":"r1"}"#.into(),
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_announces_identity_then_queries_room() {
        let mut f = fixture();
        f.machine.connect("mock://relay").unwrap();
        assert_eq!(f.machine.state(), &ConnectionState::Connecting);

        f.machine
            .handle_transport_event(TransportEvent::Connected("ack".into()));
        assert_eq!(f.machine.state(), &ConnectionState::ConnectedIdentifying);
        assert!(*f.status.borrow());
        assert_eq!(
            f.transport.sent(),
            vec![r#"{"device_id":"h832h9eh29h","identity":"MAIN_DEVICES"}"#.to_string()]
        );

        f.machine.handle_transport_event(TransportEvent::Message(
            r#"{"type":"room","room_id":"r1"}"#.into(),
        ));
        assert_eq!(f.machine.state(), &ConnectionState::ConnectedWaitingForDevice);
        assert_eq!(f.machine.room_id(), Some("r1"));
        assert_eq!(f.transport.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vessel_found_arms_heartbeat() {
        let mut f = fixture();
        connected(&mut f);
        drain(&mut f.notices);

        f.machine.handle_transport_event(room_info(&["v1"]));
        assert_eq!(f.machine.state(), &ConnectionState::ConnectedWithDevice);
        assert!(f.machine.is_heartbeat_active());
        assert!(!f.machine.is_reconnecting());
        match drain(&mut f.notices).as_slice() {
            [ConnectionNotice::DeviceConnected { room_id, devices, summary }] => {
                assert_eq!(room_id, "r1");
                assert_eq!(devices[0].device_type, "CL-0089");
                assert!(summary.contains("v1"));
            }
            other => panic!("unexpected notices {:?}", other),
        }

        let before = f.transport.queries();
        let tick = f.inputs.recv().await.unwrap();
        assert!(matches!(tick, WorkerInput::Poll { kind: PollKind::Heartbeat, .. }));
        f.machine.handle_input(tick);
        assert_eq!(f.transport.queries(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_waits_for_initial_delay() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&["v1"]));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(f.inputs.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.inputs.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn vessel_loss_starts_single_reconnect_loop() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&["v1"]));
        drain(&mut f.notices);

        f.machine.handle_transport_event(room_info(&[]));
        assert_eq!(f.machine.state(), &ConnectionState::Reconnecting);
        assert!(!f.machine.is_heartbeat_active());
        assert!(f.machine.is_reconnecting());
        assert!(!*f.status.borrow());
        assert!(f.transport.is_connected());
        assert_eq!(
            drain(&mut f.notices),
            vec![ConnectionNotice::WaitingForDevice {
                room_id: "r1".into()
            }]
        );

        // a second empty snapshot keeps the same loop
        f.machine.handle_transport_event(room_info(&[]));
        let first = f.inputs.recv().await.unwrap();
        let WorkerInput::Poll { kind, generation } = first else {
            panic!("expected poll");
        };
        assert_eq!(kind, PollKind::Reconnect);
        assert_eq!(generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_empty_rooms_notify_once() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&[]));
        f.machine.handle_transport_event(room_info(&[]));
        assert_eq!(
            f.machine.state(),
            &ConnectionState::ConnectedWaitingForDevice
        );
        assert_eq!(
            drain(&mut f.notices),
            vec![ConnectionNotice::WaitingForDevice {
                room_id: "r1".into()
            }]
        );

        f.machine.handle_transport_event(room_info(&["v1"]));
        f.machine.handle_transport_event(room_info(&[]));
        f.machine.handle_transport_event(room_info(&[]));
        let notices = drain(&mut f.notices);
        assert_eq!(notices.len(), 2);
        assert!(matches!(notices[0], ConnectionNotice::DeviceConnected { .. }));
        assert!(matches!(notices[1], ConnectionNotice::WaitingForDevice { .. }));
        assert_eq!(f.machine.state(), &ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_cancels_reconnect_and_rearms_heartbeat() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&["v1"]));
        f.machine.handle_transport_event(room_info(&[]));
        drain(&mut f.notices);

        f.machine.handle_transport_event(room_info(&["v2"]));
        assert_eq!(f.machine.state(), &ConnectionState::ConnectedWithDevice);
        assert!(!f.machine.is_reconnecting());
        assert!(f.machine.is_heartbeat_active());
        assert!(*f.status.borrow());
        assert!(matches!(
            drain(&mut f.notices).as_slice(),
            [ConnectionNotice::DeviceConnected { .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ticks_are_ignored() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&["v1"]));
        let before = f.transport.queries();

        f.machine.handle_input(WorkerInput::Poll {
            kind: PollKind::Heartbeat,
            generation: 99,
        });
        f.machine.handle_input(WorkerInput::Poll {
            kind: PollKind::Reconnect,
            generation: 1,
        });
        assert_eq!(f.transport.queries(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn roster_is_replaced_not_merged() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&["v1", "v2"]));
        assert_eq!(f.roster.borrow().devices.len(), 2);

        f.machine.handle_transport_event(room_info(&["v3"]));
        let roster = f.roster.borrow().clone();
        assert_eq!(roster.devices.len(), 1);
        assert_eq!(roster.devices[0].device_id, "v3");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_messages_change_nothing() {
        let mut f = fixture();
        connected(&mut f);
        let state = f.machine.state().clone();
        f.machine
            .handle_transport_event(TransportEvent::Message("{not json".into()));
        f.machine.handle_transport_event(TransportEvent::Message(
            r#"{"type":"room_info","room_id":"r1"}"#.into(),
        ));
        assert_eq!(f.machine.state(), &state);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_cancels_timers_and_notifies() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&["v1"]));
        drain(&mut f.notices);

        f.machine
            .handle_transport_event(TransportEvent::Failure("reset".into()));
        assert_eq!(f.machine.state(), &ConnectionState::Disconnected);
        assert!(!f.machine.is_heartbeat_active());
        assert!(!*f.status.borrow());
        assert_eq!(
            drain(&mut f.notices),
            vec![ConnectionNotice::Disconnected {
                reason: "reset".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_suppressed_while_reconnecting() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&[]));
        assert!(f.machine.is_reconnecting());

        assert!(!f.machine.disconnect(false));
        assert!(f.transport.is_connected());

        assert!(f.machine.disconnect(true));
        assert!(!f.transport.is_connected());
        assert!(!f.machine.is_reconnecting());
        assert_eq!(f.machine.state(), &ConnectionState::Disconnected);

        assert!(f.machine.disconnect(false));
        assert_eq!(*f.transport.disconnects.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_tick_after_link_close_stops_loop() {
        let mut f = fixture();
        connected(&mut f);
        f.machine.handle_transport_event(room_info(&[]));
        f.transport.connected.store(false, Ordering::SeqCst);

        let tick = f.inputs.recv().await.unwrap();
        f.machine.handle_input(tick);
        assert!(!f.machine.is_reconnecting());
    }
}
