//! Relay connection subsystem
//!
//! 1. [`transport`] - duplex text transport adapter and link connector trait
//! 2. [`mock`] - in-process relay backend
//! 3. [`roster`] - vessel devices seen in the room
//! 4. [`device_connection`] - identity / room / heartbeat state machine
//! 5. [`connection_handle`] - worker task lifecycle and subscriptions
//!
//! ```text
//! Link ──► TransportAdapter ──[TransportEvent]──► DeviceConnection ──► status / roster / notices
//!                ▲                                     │
//!                └──────────── identity, query_room ───┘
//! ```

pub mod connection_handle;
pub mod device_connection;
pub mod mock;
pub mod roster;
pub mod transport;

pub use connection_handle::{ConnectionError, ConnectionHandle, ConnectionNotice};
pub use device_connection::{ConnectionSettings, ConnectionState};
pub use mock::MockRelay;
pub use roster::{RoomSnapshot, ShipDevice};
pub use transport::{
    LinkChannels, LinkConnector, LinkEvent, Transport, TransportAdapter, TransportError,
    TransportEvent,
};
