//! Redirection host speaking the `protocol` crate
//!
//! Lifecycle on a fresh connection:
//! 1. Host sends Hello with its version string and capabilities
//! 2. Guest answers with its own Hello; the host records the peer's
//!    capabilities and sends DeviceConnect
//! 3. Guest submits device requests and transfers, each answered with a reply
//!    carrying the request id
//!
//! A host opened with [`OpenFlags::NO_HELLO`] skips steps 1 and 2 and waits for
//! [`RedirHost::restore_caps_and_send_device_connect`].

use super::{HostFactory, OpenFlags, RedirHost};
use crate::transport::GuestIo;
use crate::usb::ClaimedDevice;
use crate::usb::transfers::{DataEndpoint, TransferOutcome, execute_control, execute_data};
use bytes::{Buf, BytesMut};
use common::Error;
use protocol::{
    CURRENT_VERSION, Capability, Caps, ControlPacket, DataPacket, DeviceInfo, FrameDecoder,
    Message, MessagePayload, ProtocolError, TransferStatus, encode_framed, validate_version,
};
use rusb::{Context, DeviceHandle};
use tracing::{debug, error, info, trace, warn};

/// Bytes pulled from the transport per read call
const READ_CHUNK: usize = 16 * 1024;

/// Device operations a host needs
pub trait RedirDevice {
    type Handle;

    fn handle(&self) -> &Self::Handle;
    fn info(&self) -> &DeviceInfo;
    fn control(&mut self, request: &ControlPacket) -> TransferOutcome<ControlPacket>;
    fn data(&mut self, kind: DataEndpoint, request: &DataPacket) -> TransferOutcome<DataPacket>;
    fn reset(&mut self) -> Result<(), rusb::Error>;
    fn active_configuration(&self) -> Result<u8, rusb::Error>;
    fn set_configuration(&mut self, configuration: u8) -> Result<(), rusb::Error>;
    fn set_alt_setting(&mut self, interface: u8, alt: u8) -> Result<(), rusb::Error>;
}

impl RedirDevice for ClaimedDevice {
    type Handle = DeviceHandle<Context>;

    fn handle(&self) -> &Self::Handle {
        ClaimedDevice::handle(self)
    }

    fn info(&self) -> &DeviceInfo {
        ClaimedDevice::info(self)
    }

    fn control(&mut self, request: &ControlPacket) -> TransferOutcome<ControlPacket> {
        execute_control(ClaimedDevice::handle(self), request)
    }

    fn data(&mut self, kind: DataEndpoint, request: &DataPacket) -> TransferOutcome<DataPacket> {
        execute_data(ClaimedDevice::handle(self), kind, request)
    }

    fn reset(&mut self) -> Result<(), rusb::Error> {
        self.handle_mut().reset()
    }

    fn active_configuration(&self) -> Result<u8, rusb::Error> {
        ClaimedDevice::handle(self).active_configuration()
    }

    fn set_configuration(&mut self, configuration: u8) -> Result<(), rusb::Error> {
        ClaimedDevice::set_configuration(self, configuration)
    }

    fn set_alt_setting(&mut self, interface: u8, alt: u8) -> Result<(), rusb::Error> {
        self.handle_mut().set_alternate_setting(interface, alt)
    }
}

/// Redirection host bound to one device
pub struct UsbRedirHost<D = ClaimedDevice> {
    device: D,
    verbosity: u8,
    local_caps: Caps,
    /// Capabilities announced by the guest; `None` until its Hello
    peer_caps: Option<Caps>,
    decoder: FrameDecoder,
    outbound: BytesMut,
    next_id: u64,
    disconnected: bool,
}

impl<D: RedirDevice> UsbRedirHost<D> {
    pub fn new(device: D, version: &str, verbosity: u8, flags: OpenFlags) -> Self {
        let mut host = Self {
            device,
            verbosity,
            local_caps: Caps::local(),
            peer_caps: None,
            decoder: FrameDecoder::new(),
            outbound: BytesMut::new(),
            next_id: 0,
            disconnected: false,
        };

        if !flags.no_hello {
            host.send(MessagePayload::Hello {
                version: version.to_string(),
                caps: host.local_caps,
            });
        }
        host
    }

    fn send(&mut self, payload: MessagePayload) {
        let id = self.next_id;
        self.next_id += 1;
        self.reply(id, payload);
    }

    fn reply(&mut self, id: u64, payload: MessagePayload) {
        let message = Message {
            version: CURRENT_VERSION,
            id,
            payload,
        };
        match encode_framed(&message) {
            Ok(frame) => {
                if self.verbosity >= 5 {
                    trace!("queue {} id={} {:?}", message.payload.kind(), id, frame);
                } else {
                    debug!("queue {} id={}", message.payload.kind(), id);
                }
                self.outbound.extend_from_slice(&frame);
            }
            Err(e) => error!("Failed to encode {}: {}", message.payload.kind(), e),
        }
    }

    fn send_device_connect(&mut self) {
        if self.disconnected {
            return;
        }
        let mut device = self.device.info().clone();
        let negotiated = self
            .local_caps
            .intersect(&self.peer_caps.unwrap_or_default());
        if !negotiated.has(Capability::ConnectDeviceVersion) {
            device.device_version_bcd = 0;
        }
        info!(
            "Announcing device {:04x}:{:04x} at {}-{}",
            device.vendor_id, device.product_id, device.bus_number, device.device_address
        );
        self.send(MessagePayload::DeviceConnect { device });
    }

    fn device_gone(&mut self) {
        if !self.disconnected {
            info!("Device disconnected");
        }
        self.disconnect();
    }

    fn status_of(&mut self, result: Result<(), rusb::Error>) -> TransferStatus {
        match result {
            Ok(()) => TransferStatus::Success,
            Err(rusb::Error::NoDevice) => {
                self.device_gone();
                TransferStatus::IoError
            }
            Err(e) => crate::usb::transfers::map_rusb_error(e),
        }
    }

    fn handle_message(&mut self, message: Message) -> common::Result<()> {
        validate_version(&message.version)?;
        let id = message.id;
        debug!("received {} id={}", message.payload.kind(), id);

        if self.peer_caps.is_none() && !matches!(message.payload, MessagePayload::Hello { .. }) {
            return Err(ProtocolError::UnexpectedMessage("request before hello").into());
        }

        match message.payload {
            MessagePayload::Hello { version, caps } => {
                if self.peer_caps.is_some() {
                    return Err(ProtocolError::UnexpectedMessage("second hello").into());
                }
                info!("Peer version: {}", version);
                self.peer_caps = Some(caps);
                self.send_device_connect();
            }
            MessagePayload::DeviceDisconnectAck => {
                debug!("Peer acknowledged device disconnect");
            }
            MessagePayload::Reset => {
                if !self.disconnected {
                    let result = self.device.reset();
                    self.status_of(result);
                }
            }
            MessagePayload::GetConfiguration => {
                let (status, configuration) = if self.disconnected {
                    (TransferStatus::IoError, 0)
                } else {
                    match self.device.active_configuration() {
                        Ok(configuration) => (TransferStatus::Success, configuration),
                        Err(e) => (self.status_of(Err(e)), 0),
                    }
                };
                self.reply(
                    id,
                    MessagePayload::ConfigurationStatus {
                        status,
                        configuration,
                    },
                );
            }
            MessagePayload::SetConfiguration { configuration } => {
                let status = if self.disconnected {
                    TransferStatus::IoError
                } else {
                    let result = self.device.set_configuration(configuration);
                    self.status_of(result)
                };
                self.reply(
                    id,
                    MessagePayload::ConfigurationStatus {
                        status,
                        configuration,
                    },
                );
            }
            MessagePayload::SetAltSetting { interface, alt } => {
                let status = if self.disconnected {
                    TransferStatus::IoError
                } else {
                    let result = self.device.set_alt_setting(interface, alt);
                    self.status_of(result)
                };
                self.reply(
                    id,
                    MessagePayload::AltSettingStatus {
                        status,
                        interface,
                        alt,
                    },
                );
            }
            MessagePayload::ControlPacket(request) => {
                let reply = if self.disconnected {
                    ControlPacket {
                        status: TransferStatus::IoError,
                        data: Vec::new(),
                        ..request
                    }
                } else {
                    let outcome = self.device.control(&request);
                    if outcome.device_gone() {
                        self.device_gone();
                    }
                    outcome.reply
                };
                self.reply(id, MessagePayload::ControlPacket(reply));
            }
            MessagePayload::BulkPacket(request) => {
                let reply = self.data_transfer(DataEndpoint::Bulk, request);
                self.reply(id, MessagePayload::BulkPacket(reply));
            }
            MessagePayload::InterruptPacket(request) => {
                let reply = self.data_transfer(DataEndpoint::Interrupt, request);
                self.reply(id, MessagePayload::InterruptPacket(reply));
            }
            other => {
                warn!("Ignoring host-only message {} from peer", other.kind());
            }
        }
        Ok(())
    }

    fn data_transfer(&mut self, kind: DataEndpoint, request: DataPacket) -> DataPacket {
        if self.disconnected {
            return DataPacket {
                status: TransferStatus::IoError,
                data: Vec::new(),
                ..request
            };
        }
        let outcome = self.device.data(kind, &request);
        if outcome.device_gone() {
            self.device_gone();
        }
        outcome.reply
    }
}

impl<D: RedirDevice> RedirHost for UsbRedirHost<D> {
    type Handle = D::Handle;

    fn device(&self) -> &Self::Handle {
        self.device.handle()
    }

    fn has_data_to_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn read_guest_data(&mut self, io: &mut dyn GuestIo) -> common::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = io.read_guest(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.decoder.extend(&buf[..n]);
            while let Some(message) = self.decoder.next_message()? {
                self.handle_message(message)?;
            }
        }
    }

    fn write_guest_data(&mut self, io: &mut dyn GuestIo) -> common::Result<()> {
        while !self.outbound.is_empty() {
            let n = io.write_guest(&self.outbound[..])?;
            if n == 0 {
                break;
            }
            self.outbound.advance(n);
        }
        Ok(())
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        self.send(MessagePayload::DeviceDisconnect);
    }

    fn save_caps(&self) -> Caps {
        self.peer_caps.unwrap_or_default()
    }

    fn restore_caps_and_send_device_connect(&mut self, caps: &Caps) {
        self.peer_caps = Some(*caps);
        self.send_device_connect();
    }
}

/// Opens [`UsbRedirHost`]s on libusb handles
pub struct UsbRedirHostFactory {
    version: String,
    verbosity: u8,
}

impl UsbRedirHostFactory {
    pub fn new(version: impl Into<String>, verbosity: u8) -> Self {
        Self {
            version: version.into(),
            verbosity,
        }
    }
}

impl HostFactory for UsbRedirHostFactory {
    type Host = UsbRedirHost<ClaimedDevice>;

    fn open(&mut self, handle: DeviceHandle<Context>, flags: OpenFlags) -> common::Result<Self::Host> {
        let device = ClaimedDevice::claim(handle)
            .map_err(|e| Error::Usb(format!("Failed to claim device: {}", e)))?;
        Ok(UsbRedirHost::new(device, &self.version, self.verbosity, flags))
    }
}
