use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::transport::{LinkChannels, LinkConnector, LinkEvent, TransportError, EVENT_BUFFER};
use crate::protocol::{
    ClientEntry, IdentityAnnouncement, InboundMessage, MotorFrame, RelayRequest, CONNECTION_ACK,
};

pub const MOCK_ROOM_ID: &str = "mock-room";
pub const MOCK_VESSEL_ID: &str = "vessel-0001";

#[derive(Debug, Default)]
struct RelayState {
    vessel_present: bool,
    vessel_identity: String,
    refuse: bool,
    identities: Vec<IdentityAnnouncement>,
    frames: Vec<MotorFrame>,
    room_queries: usize,
    link: Option<mpsc::Sender<LinkEvent>>,
}

/// In-process relay for tests and the demo binary
///
/// Acknowledges every connection, assigns [`MOCK_ROOM_ID`] once the client
/// announces itself, answers room queries and records motor frames. Vessel
/// presence can be toggled while a client is connected.
#[derive(Debug, Clone)]
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MockRelay {
    pub fn new(vessel_present: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                vessel_present,
                vessel_identity: "SHIP_DEVICES".to_string(),
                ..RelayState::default()
            })),
        }
    }

    pub fn set_vessel_present(&self, present: bool) {
        info!("Mock relay: vessel present = {}", present);
        self.state.lock().vessel_present = present;
    }

    /// Makes subsequent `open` calls fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Drops the current link with a failure
    pub fn fail_link(&self, reason: &str) {
        let link = self.state.lock().link.take();
        if let Some(tx) = link {
            if tx.try_send(LinkEvent::Failed(reason.to_string())).is_err() {
                warn!("Mock relay: client already gone");
            }
        }
    }

    pub fn frames(&self) -> Vec<MotorFrame> {
        self.state.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<MotorFrame> {
        self.state.lock().frames.last().copied()
    }

    pub fn identities(&self) -> Vec<IdentityAnnouncement> {
        self.state.lock().identities.clone()
    }

    pub fn room_queries(&self) -> usize {
        self.state.lock().room_queries
    }

    fn room_info(&self) -> InboundMessage {
        let state = self.state.lock();
        let mut clients: Vec<ClientEntry> = state
            .identities
            .last()
            .map(|id| ClientEntry {
                device_id: id.device_id.clone(),
                identity: id.identity.clone(),
            })
            .into_iter()
            .collect();
        if state.vessel_present {
            clients.push(ClientEntry {
                device_id: MOCK_VESSEL_ID.to_string(),
                identity: state.vessel_identity.clone(),
            });
        }
        InboundMessage::RoomInfo {
            room_id: MOCK_ROOM_ID.to_string(),
            total_clients: clients.len() as u32,
            clients,
        }
    }

    /// Relay reaction to one client message
    fn handle(&self, text: &str) -> Option<InboundMessage> {
        if let Ok(Some(frame)) = MotorFrame::parse(text) {
            self.state.lock().frames.push(frame);
            return None;
        }
        if let Ok(Some(RelayRequest::QueryRoom)) = RelayRequest::parse(text) {
            self.state.lock().room_queries += 1;
            return Some(self.room_info());
        }
        if let Ok(Some(identity)) = IdentityAnnouncement::parse(text) {
            debug!("Mock relay: {} joined as {}", identity.device_id, identity.identity);
            self.state.lock().identities.push(identity);
            return Some(InboundMessage::Room {
                room_id: MOCK_ROOM_ID.to_string(),
            });
        }
        warn!("Mock relay: ignoring {}", text);
        None
    }
}

impl LinkConnector for MockRelay {
    fn open(&self, url: &str) -> Result<LinkChannels, TransportError> {
        if self.state.lock().refuse {
            return Err(TransportError::OpenFailed {
                url: url.to_string(),
                reason: "mock relay refused connection".to_string(),
            });
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;

        let (out_tx, mut out_rx) = mpsc::channel::<String>(EVENT_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<LinkEvent>(EVENT_BUFFER);
        self.state.lock().link = Some(in_tx.clone());

        let relay = self.clone();
        runtime.spawn(async move {
            if in_tx.send(LinkEvent::Opened).await.is_err() {
                return;
            }
            let ack = InboundMessage::Connection {
                message: CONNECTION_ACK.to_string(),
            };
            match ack.to_json() {
                Ok(text) => {
                    if in_tx.send(LinkEvent::Text(text)).await.is_err() {
                        warn!("Mock relay: client left before the acknowledgement");
                        return;
                    }
                }
                Err(e) => {
                    warn!("Mock relay: failed to encode acknowledgement: {}", e);
                    return;
                }
            }

            while let Some(text) = out_rx.recv().await {
                let Some(reply) = relay.handle(&text) else {
                    continue;
                };
                match reply.to_json() {
                    Ok(json) => {
                        if in_tx.send(LinkEvent::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Mock relay: failed to encode reply: {}", e),
                }
            }
            debug!("Mock relay: client link closed");
        });

        Ok(LinkChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_protocol_messages() {
        let relay = MockRelay::new(true);
        let identity = IdentityAnnouncement::new("ctl", "MAIN_DEVICES").to_json().unwrap();
        assert_eq!(
            relay.handle(&identity),
            Some(InboundMessage::Room {
                room_id: MOCK_ROOM_ID.into()
            })
        );

        let query = RelayRequest::QueryRoom.to_json().unwrap();
        match relay.handle(&query) {
            Some(InboundMessage::RoomInfo { clients, total_clients, .. }) => {
                assert_eq!(total_clients, 2);
                assert_eq!(clients[1].identity, "SHIP_DEVICES");
            }
            other => panic!("unexpected {:?}", other),
        }

        relay.set_vessel_present(false);
        match relay.handle(&query) {
            Some(InboundMessage::RoomInfo { clients, .. }) => assert_eq!(clients.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(relay.room_queries(), 2);
    }

    #[test]
    fn records_motor_frames() {
        let relay = MockRelay::default();
        assert_eq!(relay.handle(crate::protocol::ZERO_COMMAND_JSON), None);
        let frame = relay.last_frame().unwrap();
        assert_eq!(frame.motors.en1, 1);
        assert_eq!(relay.frames().len(), 1);
    }

    #[tokio::test]
    async fn link_greets_with_ack() {
        let relay = MockRelay::default();
        let mut channels = relay.open("mock://relay").unwrap();
        assert_eq!(channels.inbound.recv().await, Some(LinkEvent::Opened));
        match channels.inbound.recv().await {
            Some(LinkEvent::Text(text)) => assert!(text.contains(CONNECTION_ACK)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn link_task_ends_when_client_goes_away() {
        let relay = MockRelay::default();
        let LinkChannels { outbound, inbound } = relay.open("mock://relay").unwrap();
        drop(inbound);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(outbound.send("{}".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn refused_connections_fail() {
        let relay = MockRelay::default();
        relay.refuse_connections(true);
        assert!(relay.open("mock://relay").is_err());
    }
}
