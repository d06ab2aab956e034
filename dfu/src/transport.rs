use std::time::Duration;

use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use crate::DEFAULT_TIMEOUT;
use crate::error::DfuError;

/// Class-specific control requests addressed to the DFU interface
///
/// Every DFU request is a class request with the interface as recipient, so
/// an implementation only has to fill in request code, `wValue` and the data
/// stage. [UsbTransport] is the `nusb` backed implementation.
pub trait DfuTransport {
    /// Device-to-host request reading up to `length` bytes
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError>;

    /// Host-to-device request with an optional data stage
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError>;
}

impl<T: DfuTransport + ?Sized> DfuTransport for &T {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        (**self).control_in(request, value, length)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        (**self).control_out(request, value, data)
    }
}

/// Claimed DFU interface of an opened device
pub struct UsbTransport {
    interface: nusb::Interface,
    timeout: Duration,
}

impl UsbTransport {
    pub(crate) fn new(interface: nusb::Interface) -> Self {
        UsbTransport {
            interface,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Timeout applied to each control transfer
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // wIndex carries the interface number; the ST bootloader exposes DFU
    // on interface 0.
    fn index(&self) -> u16 {
        self.interface.interface_number() as u16
    }
}

impl DfuTransport for UsbTransport {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index: self.index(),
                    length,
                },
                self.timeout,
            )
            .wait()?)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        Ok(self
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index: self.index(),
                    data,
                },
                self.timeout,
            )
            .wait()?)
    }
}
