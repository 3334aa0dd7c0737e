//! Vessel devices seen in the relay room

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::protocol::ClientEntry;

/// Identity tag the vessel announces itself with
pub const VESSEL_IDENTITY: &str = "SHIP_DEVICES";
pub const VESSEL_DEVICE_TYPE: &str = "CL-0089";
pub const UNKNOWN_DEVICE_TYPE: &str = "unknown model";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipDevice {
    pub device_id: String,
    pub identity: String,
    pub device_type: String,
}

impl ShipDevice {
    pub fn new(device_id: impl Into<String>, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        let device_type = if identity == VESSEL_IDENTITY {
            VESSEL_DEVICE_TYPE
        } else {
            UNKNOWN_DEVICE_TYPE
        };
        Self {
            device_id: device_id.into(),
            identity,
            device_type: device_type.to_string(),
        }
    }
}

/// Latest view of the room, replaced wholesale on every `room_info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: Option<String>,
    pub total_clients: u32,
    pub devices: Vec<ShipDevice>,
}

impl RoomSnapshot {
    /// Keeps only the clients announcing `vessel_identity`
    pub fn from_room_info(
        room_id: &str,
        total_clients: u32,
        clients: &[ClientEntry],
        vessel_identity: &str,
    ) -> Self {
        let devices = clients
            .iter()
            .filter(|c| c.identity == vessel_identity)
            .map(|c| ShipDevice::new(c.device_id.clone(), c.identity.clone()))
            .collect();
        Self {
            room_id: Some(room_id.to_string()),
            total_clients,
            devices,
        }
    }

    pub fn has_vessel(&self) -> bool {
        !self.devices.is_empty()
    }

    /// `<room>+<device id>`, as shown on the device card
    pub fn display_id(&self, own_device_id: &str) -> String {
        format!("{}+{}", self.room_id.as_deref().unwrap_or(""), own_device_id)
    }

    /// Human-readable connection summary
    pub fn summary(&self) -> String {
        let mut out = String::from("Connected to relay\n");
        let _ = writeln!(out, "Room: {}\n", self.room_id.as_deref().unwrap_or("-"));
        if self.devices.is_empty() {
            out.push_str("No vessel detected");
        } else {
            out.push_str("Vessel devices:");
            for device in &self.devices {
                let _ = write!(
                    out,
                    "\nDevice ID: {}\nDevice type: {}",
                    device.device_id, device.device_type
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str, identity: &str) -> ClientEntry {
        ClientEntry {
            device_id: id.into(),
            identity: identity.into(),
        }
    }

    #[test]
    fn device_type_follows_identity() {
        assert_eq!(ShipDevice::new("a", "SHIP_DEVICES").device_type, "CL-0089");
        assert_eq!(ShipDevice::new("b", "BUOY").device_type, "unknown model");
    }

    #[test]
    fn only_vessels_enter_the_roster() {
        let snapshot = RoomSnapshot::from_room_info(
            "r1",
            3,
            &[
                client("ctl", "MAIN_DEVICES"),
                client("v1", "SHIP_DEVICES"),
                client("v2", "SHIP_DEVICES"),
            ],
            VESSEL_IDENTITY,
        );
        assert_eq!(snapshot.devices.len(), 2);
        assert!(snapshot.has_vessel());
        assert_eq!(snapshot.display_id("ctl"), "r1+ctl");
        assert!(snapshot.summary().contains("Device ID: v2"));
    }

    #[test]
    fn empty_room_summary() {
        let snapshot = RoomSnapshot::from_room_info("r9", 1, &[client("ctl", "MAIN_DEVICES")], VESSEL_IDENTITY);
        assert!(!snapshot.has_vessel());
        assert!(snapshot.summary().ends_with("No vessel detected"));
    }
}
