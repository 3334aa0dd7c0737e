//! Handle for the connection worker task

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device_connection::{
    run_connection_worker, ConnectionOutputs, ConnectionSettings, ConnectionState,
    DeviceConnection, WorkerInput,
};
use super::roster::{RoomSnapshot, ShipDevice};
use super::transport::{Transport, TransportError, TransportEvent};

const INPUT_BUFFER: usize = 64;
const NOTICE_BUFFER: usize = 32;

/// Fire-and-forget notifications for presentation code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    Connected,
    DeviceConnected {
        room_id: String,
        devices: Vec<ShipDevice>,
        summary: String,
    },
    WaitingForDevice {
        room_id: String,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Connection worker is not running")]
    WorkerStopped,
}

pub struct ConnectionHandle {
    inputs: mpsc::Sender<WorkerInput>,
    status: watch::Receiver<bool>,
    roster: watch::Receiver<RoomSnapshot>,
    state: watch::Receiver<ConnectionState>,
    notices: Option<mpsc::Receiver<ConnectionNotice>>,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Spawns the worker. `events` must be the transport's subscription.
    pub fn spawn(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        info!(
            "Spawning connection worker as {} ({})",
            settings.device_id, settings.identity
        );

        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);
        let (status_tx, status) = watch::channel(false);
        let (roster_tx, roster) = watch::channel(RoomSnapshot::default());
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let machine = DeviceConnection::new(
            settings,
            transport,
            ConnectionOutputs {
                status: status_tx,
                roster: roster_tx,
                state: state_tx,
                notices: notice_tx,
            },
            input_tx.clone(),
        );

        let cancel = CancellationToken::new();
        let task_handle = tokio::spawn(run_connection_worker(
            machine,
            input_rx,
            events,
            cancel.clone(),
        ));
        debug!("Connection worker task spawned");

        Self {
            inputs: input_tx,
            status,
            roster,
            state,
            notices: Some(notice_rx),
            cancel,
            task_handle: Some(task_handle),
        }
    }

    pub async fn connect(&self, url: &str) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.inputs
            .send(WorkerInput::Connect {
                url: url.to_string(),
                reply,
            })
            .await
            .map_err(|_| ConnectionError::WorkerStopped)?;
        rx.await.map_err(|_| ConnectionError::WorkerStopped)?
    }

    /// `Ok(false)` when suppressed by an active reconnect loop.
    pub async fn disconnect(&self, force: bool) -> Result<bool, ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.inputs
            .send(WorkerInput::Disconnect { force, reply })
            .await
            .map_err(|_| ConnectionError::WorkerStopped)?;
        rx.await.map_err(|_| ConnectionError::WorkerStopped)
    }

    pub fn is_connected(&self) -> bool {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.status.clone()
    }

    pub fn subscribe_roster(&self) -> watch::Receiver<RoomSnapshot> {
        self.roster.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn roster(&self) -> RoomSnapshot {
        self.roster.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// The notice stream has a single consumer; later calls return `None`.
    pub fn take_notices(&mut self) -> Option<mpsc::Receiver<ConnectionNotice>> {
        self.notices.take()
    }

    /// Stops the worker and closes the transport. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        match self.task_handle.take() {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Connection worker panicked: {}", e);
                } else {
                    debug!("Connection worker joined");
                }
            }
            None => debug!("Connection worker already stopped"),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            warn!("Connection handle dropped without shutdown");
            self.cancel.cancel();
        }
    }
}
