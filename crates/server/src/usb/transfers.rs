//! USB transfer execution
//!
//! Runs the control, bulk and interrupt packets received from the guest
//! against the device and builds the reply packet. Transfers are synchronous;
//! IN transfers on bulk and interrupt endpoints use a short timeout so an idle
//! endpoint does not stall the event loop.

use protocol::{ControlPacket, DataPacket, TransferStatus};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Timeout for control transfers
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on IN timeouts for bulk and interrupt endpoints
const MAX_IN_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for bulk and interrupt OUT transfers
const OUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest IN transfer serviced in one packet
const MAX_IN_LENGTH: usize = 64 * 1024;

/// Reply packet plus the library error that produced a failure status, if any
#[derive(Debug)]
pub struct TransferOutcome<P> {
    pub reply: P,
    pub error: Option<rusb::Error>,
}

impl<P> TransferOutcome<P> {
    /// The device is gone and further requests are pointless
    pub fn device_gone(&self) -> bool {
        matches!(self.error, Some(rusb::Error::NoDevice))
    }
}

/// Execute a control transfer on endpoint 0
pub fn execute_control(
    handle: &DeviceHandle<Context>,
    request: &ControlPacket,
) -> TransferOutcome<ControlPacket> {
    debug!(
        "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, length={}",
        request.request_type, request.request, request.value, request.index, request.length
    );

    let result = if request.is_in() {
        let mut buffer = vec![0u8; request.length as usize];
        handle
            .read_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                &mut buffer,
                CONTROL_TIMEOUT,
            )
            .map(|len| {
                buffer.truncate(len);
                buffer
            })
    } else {
        handle
            .write_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                &request.data,
                CONTROL_TIMEOUT,
            )
            .map(|_| Vec::new())
    };

    let (status, data, error) = settle("Control", result);
    TransferOutcome {
        reply: ControlPacket {
            status,
            length: data.len() as u16,
            data,
            ..request.clone()
        },
        error,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEndpoint {
    Bulk,
    Interrupt,
}

/// Execute a bulk or interrupt transfer
pub fn execute_data(
    handle: &DeviceHandle<Context>,
    kind: DataEndpoint,
    request: &DataPacket,
) -> TransferOutcome<DataPacket> {
    let label = match kind {
        DataEndpoint::Bulk => "Bulk",
        DataEndpoint::Interrupt => "Interrupt",
    };
    debug!(
        "{} transfer: endpoint={:#x}, length={}, data_len={}",
        label,
        request.endpoint,
        request.length,
        request.data.len()
    );

    let result = if request.is_in() {
        let mut buffer = vec![0u8; (request.length as usize).min(MAX_IN_LENGTH)];
        let read = match kind {
            DataEndpoint::Bulk => handle.read_bulk(request.endpoint, &mut buffer, MAX_IN_TIMEOUT),
            DataEndpoint::Interrupt => {
                handle.read_interrupt(request.endpoint, &mut buffer, MAX_IN_TIMEOUT)
            }
        };
        read.map(|len| {
            buffer.truncate(len);
            buffer
        })
    } else {
        let written = match kind {
            DataEndpoint::Bulk => handle.write_bulk(request.endpoint, &request.data, OUT_TIMEOUT),
            DataEndpoint::Interrupt => {
                handle.write_interrupt(request.endpoint, &request.data, OUT_TIMEOUT)
            }
        };
        written.map(|_| Vec::new())
    };

    let (status, data, error) = settle(label, result);
    TransferOutcome {
        reply: DataPacket {
            endpoint: request.endpoint,
            length: if request.is_in() {
                data.len() as u32
            } else {
                request.data.len() as u32
            },
            status,
            data,
        },
        error,
    }
}

fn settle(
    label: &str,
    result: Result<Vec<u8>, rusb::Error>,
) -> (TransferStatus, Vec<u8>, Option<rusb::Error>) {
    match result {
        Ok(data) => {
            trace!("{} transfer succeeded: {} bytes", label, data.len());
            (TransferStatus::Success, data, None)
        }
        // An idle IN endpoint; the guest resubmits
        Err(rusb::Error::Timeout) => {
            trace!("{} transfer timed out", label);
            (TransferStatus::Timeout, Vec::new(), Some(rusb::Error::Timeout))
        }
        Err(e) => {
            warn!("{} transfer failed: {}", label, e);
            (map_rusb_error(e), Vec::new(), Some(e))
        }
    }
}

/// Map rusb::Error to the transfer status reported to the guest
pub fn map_rusb_error(err: rusb::Error) -> TransferStatus {
    match err {
        rusb::Error::Timeout => TransferStatus::Timeout,
        rusb::Error::Pipe => TransferStatus::Stall,
        rusb::Error::Overflow => TransferStatus::Babble,
        rusb::Error::InvalidParam => TransferStatus::Inval,
        rusb::Error::Interrupted => TransferStatus::Cancelled,
        _ => TransferStatus::IoError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), TransferStatus::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), TransferStatus::Stall);
        assert_eq!(map_rusb_error(rusb::Error::Overflow), TransferStatus::Babble);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), TransferStatus::IoError);
        assert_eq!(map_rusb_error(rusb::Error::Io), TransferStatus::IoError);
    }

    #[test]
    fn test_timed_out_read_is_not_success() {
        let (status, data, error) = settle("Bulk", Err(rusb::Error::Timeout));
        assert_eq!(status, TransferStatus::Timeout);
        assert!(data.is_empty());
        assert_eq!(error, Some(rusb::Error::Timeout));

        let (status, data, _) = settle("Interrupt", Ok(vec![1, 2]));
        assert_eq!(status, TransferStatus::Success);
        assert_eq!(data, vec![1, 2]);
    }

    #[test]
    fn test_device_gone_only_for_no_device() {
        let gone = TransferOutcome {
            reply: (),
            error: Some(rusb::Error::NoDevice),
        };
        assert!(gone.device_gone());

        let stalled = TransferOutcome {
            reply: (),
            error: Some(rusb::Error::Pipe),
        };
        assert!(!stalled.device_gone());

        let fine = TransferOutcome {
            reply: (),
            error: None,
        };
        assert!(!fine.device_gone());
    }
}
