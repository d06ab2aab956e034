use nusb::transfer::TransferError;

use crate::status::DfuStatus;

#[derive(Debug)]
pub enum DfuError {
    /// Enumerating, opening or claiming the device failed
    Usb(nusb::Error),
    /// A control transfer failed at the transport level
    Transfer(TransferError),
    /// No DFU functional descriptor on any interface
    DescriptorNotFound,
    /// The device reported a non-OK status or the dfuERROR state
    Status(DfuStatus),
    UnknownState(u8),
    ShortResponse(usize),
    ImageTooLarge { len: usize, max: usize },
    Timeout,
    Cancelled,
}

impl DfuError {
    /// Whether a failed status read may be retried.
    ///
    /// Everything the device can recover from (stall, fault, a transfer
    /// timing out, a garbled response) is transient; losing the device is not.
    pub fn is_transient(&self) -> bool {
        match self {
            DfuError::Transfer(err) => {
                !matches!(err, TransferError::Disconnected)
            }
            DfuError::UnknownState(_) | DfuError::ShortResponse(_) => true,
            _ => false,
        }
    }

    pub(crate) fn is_disconnect(&self) -> bool {
        matches!(self, DfuError::Transfer(TransferError::Disconnected))
    }
}

impl std::error::Error for DfuError {}

impl std::fmt::Display for DfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuError::Usb(err) => write!(f, "USB error: {}", err),
            DfuError::Transfer(err) => write!(f, "Transfer error: {}", err),
            DfuError::DescriptorNotFound => {
                write!(f, "No DFU functional descriptor found")
            }
            DfuError::Status(st) => write!(
                f,
                "DFU status error: {} (state {})",
                st.status(),
                st.state()
            ),
            DfuError::UnknownState(code) => {
                write!(f, "Unknown DFU state: code {}", code)
            }
            DfuError::ShortResponse(len) => {
                write!(f, "Short GET_STATUS response: {} bytes", len)
            }
            DfuError::ImageTooLarge { len, max } => write!(
                f,
                "Image of {} bytes exceeds the {} bytes addressable by block numbers",
                len, max
            ),
            DfuError::Timeout => {
                write!(f, "Timeout")
            }
            DfuError::Cancelled => {
                write!(f, "Cancelled")
            }
        }
    }
}

impl From<nusb::Error> for DfuError {
    fn from(err: nusb::Error) -> Self {
        DfuError::Usb(err)
    }
}

impl From<TransferError> for DfuError {
    fn from(err: TransferError) -> Self {
        DfuError::Transfer(err)
    }
}

impl From<&DfuStatus> for DfuError {
    fn from(st: &DfuStatus) -> Self {
        DfuError::Status(st.clone())
    }
}
