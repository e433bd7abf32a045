//! Protocol message definitions
//!
//! Messages are organized into logical groups:
//! - Greeting (hello with capability negotiation)
//! - Device presence (connect/disconnect)
//! - Device requests (reset, configuration, alt settings)
//! - USB transfers (control, bulk, interrupt)

use crate::types::{Caps, ControlPacket, DataPacket, DeviceInfo, TransferStatus};
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// Top-level message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version of this message
    pub version: ProtocolVersion,
    /// Request id; replies echo the id of the request they answer
    pub id: u64,
    pub payload: MessagePayload,
}

/// All message kinds exchanged between host and guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    // Greeting
    /// First message in each direction on a fresh connection
    Hello {
        /// Free-form implementation version string
        version: String,
        /// Capabilities the sender supports
        caps: Caps,
    },

    // Device presence (host -> guest)
    /// A device is bound to the connection and ready for requests
    DeviceConnect { device: DeviceInfo },

    /// The bound device went away
    DeviceDisconnect,

    /// Guest acknowledges DeviceDisconnect
    DeviceDisconnectAck,

    // Device requests (guest -> host, answered with a status)
    Reset,

    GetConfiguration,

    SetConfiguration { configuration: u8 },

    ConfigurationStatus {
        status: TransferStatus,
        configuration: u8,
    },

    SetAltSetting { interface: u8, alt: u8 },

    AltSettingStatus {
        status: TransferStatus,
        interface: u8,
        alt: u8,
    },

    // USB transfers (both directions)
    ControlPacket(ControlPacket),

    BulkPacket(DataPacket),

    InterruptPacket(DataPacket),
}

impl MessagePayload {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::Hello { .. } => "hello",
            MessagePayload::DeviceConnect { .. } => "device_connect",
            MessagePayload::DeviceDisconnect => "device_disconnect",
            MessagePayload::DeviceDisconnectAck => "device_disconnect_ack",
            MessagePayload::Reset => "reset",
            MessagePayload::GetConfiguration => "get_configuration",
            MessagePayload::SetConfiguration { .. } => "set_configuration",
            MessagePayload::ConfigurationStatus { .. } => "configuration_status",
            MessagePayload::SetAltSetting { .. } => "set_alt_setting",
            MessagePayload::AltSettingStatus { .. } => "alt_setting_status",
            MessagePayload::ControlPacket(_) => "control_packet",
            MessagePayload::BulkPacket(_) => "bulk_packet",
            MessagePayload::InterruptPacket(_) => "interrupt_packet",
        }
    }
}
