//! Duplex text transport to the relay
//!
//! [`TransportAdapter`] sits between the raw link (anything implementing
//! [`LinkConnector`]) and the device connection worker. It tracks the active
//! url and connected flag, pushes all outbound text through a single channel
//! so frames keep their order, and forwards link events to exactly one
//! subscriber.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::InboundMessage;

pub const EVENT_BUFFER: usize = 256;

/// Events a raw link reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Text(String),
    Failed(String),
    Closed,
}

/// Both halves of an opened link
pub struct LinkChannels {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens raw duplex links, e.g. a websocket client or an in-process relay
pub trait LinkConnector: Send + Sync + 'static {
    fn open(&self, url: &str) -> Result<LinkChannels, TransportError>;
}

/// What the adapter's subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The relay acknowledged the connection
    Connected(String),
    Message(String),
    Failure(String),
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid connection url")]
    EmptyUrl,

    #[error("Failed to open link to {url}: {reason}")]
    OpenFailed { url: String, reason: String },

    #[error("Transport already has a subscriber")]
    AlreadySubscribed,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// The operations the control and connection workers need from a transport
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Queues `text` for sending. `false` when not connected or the
    /// outbound queue is full.
    fn send(&self, text: &str) -> bool;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

struct ActiveLink {
    url: String,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

type Subscriber = Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>;

pub struct TransportAdapter {
    connector: Arc<dyn LinkConnector>,
    link: Mutex<Option<ActiveLink>>,
    connected: Arc<AtomicBool>,
    subscriber: Subscriber,
}

impl TransportAdapter {
    pub fn new(connector: Arc<dyn LinkConnector>) -> Self {
        Self {
            connector,
            link: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            subscriber: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers the single event consumer
    pub fn subscribe(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut slot = self.subscriber.lock();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            warn!("Rejecting second transport subscriber");
            return Err(TransportError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        *slot = Some(tx);
        debug!("Transport subscriber registered");
        Ok(rx)
    }

    pub fn unsubscribe(&self) {
        if self.subscriber.lock().take().is_some() {
            debug!("Transport subscriber released");
        }
    }

    pub fn url(&self) -> Option<String> {
        self.link.lock().as_ref().map(|link| link.url.clone())
    }

    fn emit_now(&self, event: TransportEvent) {
        let sender = self.subscriber.lock().clone();
        if let Some(tx) = sender {
            if let Err(e) = tx.try_send(event) {
                warn!("Dropping transport event: {}", e);
            }
        }
    }

    fn close_link(&self) -> bool {
        match self.link.lock().take() {
            Some(link) => {
                link.cancel.cancel();
                info!("Closed link to {}", link.url);
                true
            }
            None => false,
        }
    }
}

impl Transport for TransportAdapter {
    fn connect(&self, url: &str) -> Result<(), TransportError> {
        if url.trim().is_empty() {
            error!("Refusing to connect: empty url");
            self.emit_now(TransportEvent::Failure(TransportError::EmptyUrl.to_string()));
            return Err(TransportError::EmptyUrl);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;

        self.close_link();
        self.connected.store(false, Ordering::Release);

        info!("Connecting to {}", url);
        let channels = match self.connector.open(url) {
            Ok(channels) => channels,
            Err(e) => {
                error!("Connection to {} failed: {}", url, e);
                self.emit_now(TransportEvent::Failure(e.to_string()));
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        runtime.spawn(pump_link_events(
            channels.inbound,
            Arc::clone(&self.connected),
            Arc::clone(&self.subscriber),
            cancel.clone(),
        ));

        *self.link.lock() = Some(ActiveLink {
            url: url.to_string(),
            outbound: channels.outbound,
            cancel,
        });
        Ok(())
    }

    fn send(&self, text: &str) -> bool {
        if !self.is_connected() {
            debug!("Not connected, dropping outbound message");
            return false;
        }
        let link = self.link.lock();
        let Some(link) = link.as_ref() else {
            return false;
        };
        match link.outbound.try_send(text.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Outbound send failed: {}", e);
                false
            }
        }
    }

    fn disconnect(&self) {
        self.close_link();
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn pump_link_events(
    mut inbound: mpsc::Receiver<LinkEvent>,
    connected: Arc<AtomicBool>,
    subscriber: Subscriber,
    cancel: CancellationToken,
) {
    debug!("Link event pump started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = inbound.recv() => event,
        };

        let forwarded = match event {
            Some(LinkEvent::Opened) => {
                debug!("Link opened");
                connected.store(true, Ordering::Release);
                None
            }
            Some(LinkEvent::Text(text)) => {
                debug!("Received: {}", text);
                match InboundMessage::parse(&text) {
                    Ok(Some(msg)) if msg.is_connection_ack() => {
                        info!("Relay acknowledged connection");
                        connected.store(true, Ordering::Release);
                        Some(TransportEvent::Connected(text))
                    }
                    _ => Some(TransportEvent::Message(text)),
                }
            }
            Some(LinkEvent::Failed(reason)) => {
                error!("Link failed: {}", reason);
                connected.store(false, Ordering::Release);
                Some(TransportEvent::Failure(reason))
            }
            Some(LinkEvent::Closed) | None => {
                info!("Link closed by peer");
                connected.store(false, Ordering::Release);
                Some(TransportEvent::Closed)
            }
        };

        let terminal = matches!(
            forwarded,
            Some(TransportEvent::Failure(_)) | Some(TransportEvent::Closed)
        );
        if let Some(event) = forwarded {
            let sender = subscriber.lock().clone();
            if let Some(tx) = sender {
                if tx.send(event).await.is_err() {
                    debug!("Transport subscriber gone");
                }
            }
        }
        if terminal {
            break;
        }
    }
    debug!("Link event pump stopped");
}
