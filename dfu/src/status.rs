use std::{fmt, time::Duration};

use crate::error::DfuError;

pub(crate) const DFU_STATUS_LEN: u16 = 6;

/// DFU device state (`bState`), section 6.1.2
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DownloadSync,
    DownloadBusy,
    DownloadIdle,
    ManifestSync,
    Manifest,
    ManifestWaitReset,
    UploadIdle,
    DfuError,
}

impl DfuState {
    /// States that end the post-DNLOAD poll loop: the device either
    /// accepts the next request or needs a DFU_CLRSTATUS.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DfuState::DfuIdle | DfuState::DownloadIdle | DfuState::DfuError
        )
    }

    pub fn code(&self) -> u8 {
        match self {
            DfuState::AppIdle => 0,
            DfuState::AppDetach => 1,
            DfuState::DfuIdle => 2,
            DfuState::DownloadSync => 3,
            DfuState::DownloadBusy => 4,
            DfuState::DownloadIdle => 5,
            DfuState::ManifestSync => 6,
            DfuState::Manifest => 7,
            DfuState::ManifestWaitReset => 8,
            DfuState::UploadIdle => 9,
            DfuState::DfuError => 10,
        }
    }
}

impl TryFrom<u8> for DfuState {
    type Error = DfuError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => DfuState::AppIdle,
            1 => DfuState::AppDetach,
            2 => DfuState::DfuIdle,
            3 => DfuState::DownloadSync,
            4 => DfuState::DownloadBusy,
            5 => DfuState::DownloadIdle,
            6 => DfuState::ManifestSync,
            7 => DfuState::Manifest,
            8 => DfuState::ManifestWaitReset,
            9 => DfuState::UploadIdle,
            10 => DfuState::DfuError,
            other => return Err(DfuError::UnknownState(other)),
        })
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::DfuIdle => "dfuIDLE",
            DfuState::DownloadSync => "dfuDNLOAD-SYNC",
            DfuState::DownloadBusy => "dfuDNBUSY",
            DfuState::DownloadIdle => "dfuDNLOAD-IDLE",
            DfuState::ManifestSync => "dfuMANIFEST-SYNC",
            DfuState::Manifest => "dfuMANIFEST",
            DfuState::ManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::UploadIdle => "dfuUPLOAD-IDLE",
            DfuState::DfuError => "dfuERROR",
        };
        f.write_str(name)
    }
}

/// DFU status code (`bStatus`), section 6.1.2
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    ErrTarget,
    ErrFile,
    ErrWrite,
    ErrErase,
    ErrCheckErased,
    ErrProg,
    ErrVerify,
    ErrAddress,
    ErrNotDone,
    ErrFirmware,
    ErrVendor,
    ErrUsbReset,
    ErrPowerOnReset,
    ErrUnknown,
    ErrStalledPacket,
    Other(u8),
}

impl From<u8> for StatusCode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => StatusCode::Ok,
            0x01 => StatusCode::ErrTarget,
            0x02 => StatusCode::ErrFile,
            0x03 => StatusCode::ErrWrite,
            0x04 => StatusCode::ErrErase,
            0x05 => StatusCode::ErrCheckErased,
            0x06 => StatusCode::ErrProg,
            0x07 => StatusCode::ErrVerify,
            0x08 => StatusCode::ErrAddress,
            0x09 => StatusCode::ErrNotDone,
            0x0a => StatusCode::ErrFirmware,
            0x0b => StatusCode::ErrVendor,
            0x0c => StatusCode::ErrUsbReset,
            0x0d => StatusCode::ErrPowerOnReset,
            0x0e => StatusCode::ErrUnknown,
            0x0f => StatusCode::ErrStalledPacket,
            other => StatusCode::Other(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "OK"),
            StatusCode::ErrTarget => write!(f, "errTARGET"),
            StatusCode::ErrFile => write!(f, "errFILE"),
            StatusCode::ErrWrite => write!(f, "errWRITE"),
            StatusCode::ErrErase => write!(f, "errERASE"),
            StatusCode::ErrCheckErased => write!(f, "errCHECK_ERASED"),
            StatusCode::ErrProg => write!(f, "errPROG"),
            StatusCode::ErrVerify => write!(f, "errVERIFY"),
            StatusCode::ErrAddress => write!(f, "errADDRESS"),
            StatusCode::ErrNotDone => write!(f, "errNOTDONE"),
            StatusCode::ErrFirmware => write!(f, "errFIRMWARE"),
            StatusCode::ErrVendor => write!(f, "errVENDOR"),
            StatusCode::ErrUsbReset => write!(f, "errUSBR"),
            StatusCode::ErrPowerOnReset => write!(f, "errPOR"),
            StatusCode::ErrUnknown => write!(f, "errUNKNOWN"),
            StatusCode::ErrStalledPacket => write!(f, "errSTALLEDPKT"),
            StatusCode::Other(code) => write!(f, "status 0x{code:02x}"),
        }
    }
}

/// Decoded `DFU_GETSTATUS` response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfuStatus {
    status: StatusCode,
    poll_timeout: Duration,
    state: DfuState,
    string_index: u8,
}

impl DfuStatus {
    /// Decode the 6-byte response: `bStatus`, `bwPollTimeout` (3 bytes LE),
    /// `bState`, `iString`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DfuError> {
        if data.len() < DFU_STATUS_LEN as usize {
            return Err(DfuError::ShortResponse(data.len()));
        }
        let poll_timeout = u32::from_le_bytes([data[1], data[2], data[3], 0]);
        Ok(DfuStatus {
            status: StatusCode::from(data[0]),
            poll_timeout: Duration::from_millis(poll_timeout.into()),
            state: DfuState::try_from(data[4])?,
            string_index: data[5],
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Minimum time the device asks the host to wait before the next
    /// `DFU_GETSTATUS` (`bwPollTimeout`)
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    pub fn string_index(&self) -> u8 {
        self.string_index
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok && self.state != DfuState::DfuError
    }

    pub fn ok(&self) -> Result<(), DfuError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(DfuError::from(self))
        }
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, state {}", self.status, self.state)?;
        if !self.poll_timeout.is_zero() {
            write!(f, ", poll timeout {:?}", self.poll_timeout)?;
        }
        Ok(())
    }
}
