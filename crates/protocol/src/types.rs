//! USB and capability types carried by redirection messages
//!
//! Transfer packets travel in both directions with the same shape: the guest
//! fills in the request fields and the host echoes them back with a status and,
//! for IN transfers, the data read from the device.

use serde::{Deserialize, Serialize};

/// Number of 32-bit words in a capability vector
pub const CAPS_SIZE: usize = 1;

/// Optional protocol features negotiated in the Hello exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    /// DeviceConnect carries the device's bcdDevice
    ConnectDeviceVersion = 0,
    /// Peer acknowledges DeviceDisconnect with DeviceDisconnectAck
    DeviceDisconnectAck = 1,
}

impl Capability {
    /// Every capability this host honours
    pub const ALL: [Capability; 2] = [
        Capability::ConnectDeviceVersion,
        Capability::DeviceDisconnectAck,
    ];

    fn word_and_mask(self) -> (usize, u32) {
        let bit = self as usize;
        (bit / 32, 1 << (bit % 32))
    }
}

/// Fixed-size capability snapshot
///
/// Opaque to everything but the protocol layer. A host captures the peer's
/// snapshot before it is torn down so a replacement host can resume without a
/// second Hello exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Caps([u32; CAPS_SIZE]);

impl Caps {
    /// Capabilities advertised by this host
    pub fn local() -> Self {
        Capability::ALL
            .iter()
            .fold(Caps::default(), |caps, cap| caps.with(*cap))
    }

    pub fn from_words(words: [u32; CAPS_SIZE]) -> Self {
        Self(words)
    }

    pub fn words(&self) -> [u32; CAPS_SIZE] {
        self.0
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.set(cap);
        self
    }

    pub fn set(&mut self, cap: Capability) {
        let (word, mask) = cap.word_and_mask();
        self.0[word] |= mask;
    }

    pub fn has(&self, cap: Capability) -> bool {
        let (word, mask) = cap.word_and_mask();
        self.0[word] & mask != 0
    }

    /// Capabilities usable on a link where both sides advertise them
    pub fn intersect(&self, other: &Caps) -> Caps {
        let mut words = [0u32; CAPS_SIZE];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.0[i] & other.0[i];
        }
        Caps(words)
    }
}

/// Device description sent in DeviceConnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub speed: DeviceSpeed,
    /// bcdDevice, only meaningful with ConnectDeviceVersion
    pub device_version_bcd: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// USB device speed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
    Unknown,
}

/// Completion status of a transfer or device request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferStatus {
    #[default]
    Success,
    Cancelled,
    Inval,
    IoError,
    Stall,
    Timeout,
    Babble,
}

impl TransferStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Success)
    }
}

/// Control transfer on endpoint 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPacket {
    pub endpoint: u8,
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Requested length for IN transfers
    pub length: u16,
    pub status: TransferStatus,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Bulk or interrupt transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    pub endpoint: u8,
    /// Requested length for IN transfers
    pub length: u32,
    pub status: TransferStatus,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl ControlPacket {
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

impl DataPacket {
    pub fn is_in(&self) -> bool {
        self.endpoint & 0x80 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_caps_has_everything() {
        let caps = Caps::local();
        for cap in Capability::ALL {
            assert!(caps.has(cap), "missing {:?}", cap);
        }
    }

    #[test]
    fn test_caps_intersection() {
        let ours = Caps::local();
        let theirs = Caps::default().with(Capability::DeviceDisconnectAck);

        let common = ours.intersect(&theirs);
        assert!(common.has(Capability::DeviceDisconnectAck));
        assert!(!common.has(Capability::ConnectDeviceVersion));
    }

    #[test]
    fn test_local_caps_skip_unknown_bits() {
        // Bits past the known capabilities are never advertised
        assert_eq!(Caps::local().words(), [0b11]);
        let peer = Caps::from_words([u32::MAX]);
        assert_eq!(Caps::local().intersect(&peer), Caps::local());
    }

    #[test]
    fn test_caps_words_are_stable() {
        let caps = Caps::default().with(Capability::DeviceDisconnectAck);
        assert_eq!(caps.words(), [0b10]);
        assert_eq!(Caps::from_words([0b10]), caps);
    }

    #[test]
    fn test_packet_direction() {
        let mut control = ControlPacket {
            endpoint: 0,
            request_type: 0x80,
            request: 6,
            value: 0x0100,
            index: 0,
            length: 18,
            status: TransferStatus::Success,
            data: Vec::new(),
        };
        assert!(control.is_in());
        control.request_type = 0x00;
        assert!(!control.is_in());

        let bulk = DataPacket {
            endpoint: 0x02,
            length: 0,
            status: TransferStatus::Success,
            data: vec![1, 2, 3],
        };
        assert!(!bulk.is_in());
    }
}
