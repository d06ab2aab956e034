use std::{thread, time::Instant};

use log::{debug, trace, warn};

use crate::config::PollPolicy;
use crate::error::*;
use crate::status::*;
use crate::transport::{DfuTransport, UsbTransport};

const DFU_CMD_DETACH: u8 = 0;
const DFU_CMD_DOWNLOAD: u8 = 1;
const DFU_CMD_GETSTATUS: u8 = 3;
const DFU_CMD_CLRSTATUS: u8 = 4;
const DFU_CMD_ABORT: u8 = 6;

const DFUSE_CMD_ADDR: u8 = 0x21;

/// Block number carrying DfuSe commands and the final empty block
pub const COMMAND_BLOCK: u16 = 0;
/// Block number of the first firmware data block
pub const FIRST_DATA_BLOCK: u16 = 2;

/// DfuSe "set address pointer" command
pub fn set_address_command(addr: u32) -> [u8; 5] {
    let addr = addr.to_le_bytes();
    [DFUSE_CMD_ADDR, addr[0], addr[1], addr[2], addr[3]]
}

/// Session on a claimed DFU interface
pub struct DfuConnection<T: DfuTransport = UsbTransport> {
    transport: T,
    xfer_size: u16,
    poll: PollPolicy,
}

impl<T: DfuTransport> DfuConnection<T> {
    /// `xfer_size` is the device's `wTransferSize`, 0 if unknown
    pub fn new(transport: T, xfer_size: u16) -> Self {
        DfuConnection {
            transport,
            xfer_size,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn transfer_size(&self) -> u16 {
        self.xfer_size
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// `DFU_GETSTATUS`
    pub fn get_status(&self) -> Result<DfuStatus, DfuError> {
        let data = self.transport.control_in(
            DFU_CMD_GETSTATUS,
            0,
            DFU_STATUS_LEN,
        )?;
        DfuStatus::from_bytes(&data)
    }

    pub fn clear_status(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_CLRSTATUS, 0, &[])
    }

    pub fn abort(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_ABORT, 0, &[])
    }

    /// Bring the device back to dfuIDLE, clearing a pending error first.
    pub fn reset_state(&self) -> Result<(), DfuError> {
        let mut st = self.get_status()?;
        if st.state() == DfuState::DfuError || !st.is_ok() {
            debug!("clearing device status ({st})");
            self.clear_status()?;
            st = self.get_status()?;
        }
        if st.state() != DfuState::DfuIdle {
            debug!("aborting pending operation ({st})");
            self.abort()?;
            st = self.get_status()?;
        }
        st.ok()
    }

    /// `DFU_DNLOAD` of one block.
    ///
    /// Unless `ignore_completion` is set, keeps polling the status until the
    /// device settles and returns that status. A device error is returned as
    /// a status, it is up to the caller to reject it.
    pub fn download_block(
        &self,
        block_nr: u16,
        data: &[u8],
        ignore_completion: bool,
    ) -> Result<Option<DfuStatus>, DfuError> {
        if ignore_completion {
            self.dnload(block_nr, data)?;
            Ok(None)
        } else {
            self.dnload_and_wait(block_nr, data).map(Some)
        }
    }

    /// Point the DfuSe write address at `addr`. The ST bootloader erases
    /// the sectors it writes to as the download proceeds.
    pub fn set_address(&self, addr: u32) -> Result<DfuStatus, DfuError> {
        self.dnload_and_wait(COMMAND_BLOCK, &set_address_command(addr))
    }

    /// `DFU_DETACH` with a `timeout_ms` hint.
    ///
    /// The device leaves DFU mode and may not acknowledge, so transfer
    /// failures are only logged.
    pub fn detach(&self, timeout_ms: u16) -> Result<(), DfuError> {
        if let Err(err) =
            self.transport.control_out(DFU_CMD_DETACH, timeout_ms, &[])
        {
            debug!("DETACH not acknowledged: {err}");
        }
        Ok(())
    }

    fn dnload(&self, block_nr: u16, data: &[u8]) -> Result<(), DfuError> {
        trace!("DNLOAD block {block_nr}, {} bytes", data.len());
        self.transport.control_out(DFU_CMD_DOWNLOAD, block_nr, data)
    }

    fn dnload_and_wait(
        &self,
        block_nr: u16,
        data: &[u8],
    ) -> Result<DfuStatus, DfuError> {
        self.dnload(block_nr, data)?;
        self.poll_until_settled()
    }

    fn poll_until_settled(&self) -> Result<DfuStatus, DfuError> {
        let start = Instant::now();
        let mut polls: u32 = 0;
        let mut failures: u32 = 0;
        loop {
            if self.poll.max_polls.is_some_and(|max| polls >= max)
                || self.poll.timeout.is_some_and(|t| start.elapsed() >= t)
            {
                return Err(DfuError::Timeout);
            }
            polls += 1;

            match self.get_status() {
                Ok(st) if st.state().is_settled() => return Ok(st),
                Ok(st) => {
                    failures = 0;
                    trace!("waiting for device: {st}");
                    if self.poll.honor_poll_timeout
                        && !st.poll_timeout().is_zero()
                    {
                        thread::sleep(st.poll_timeout());
                    }
                }
                Err(err)
                    if err.is_transient()
                        && failures < self.poll.max_transient_failures =>
                {
                    failures += 1;
                    warn!("status read failed ({err}), polling again");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nusb::transfer::TransferError;

    use super::*;
    use crate::mock::*;

    fn connection(mock: &MockTransport) -> DfuConnection<&MockTransport> {
        DfuConnection::new(mock, 2048).with_poll_policy(PollPolicy {
            max_polls: Some(50),
            timeout: None,
            max_transient_failures: 3,
            honor_poll_timeout: false,
        })
    }

    #[test]
    fn test_get_status_request() {
        let mock = MockTransport::new();
        mock.push_status(status_bytes(0, DfuState::DfuIdle));
        let st = connection(&mock).get_status().unwrap();
        assert_eq!(st.state(), DfuState::DfuIdle);
        assert_eq!(mock.requests(), vec![Request::In {
            request: 3,
            value: 0,
            length: 6
        }]);
    }

    #[test]
    fn test_get_status_transfer_error() {
        let mock = MockTransport::new();
        mock.push_status_error(TransferError::Stall);
        let err = connection(&mock).get_status().unwrap_err();
        assert!(matches!(err, DfuError::Transfer(TransferError::Stall)));
    }

    #[test]
    fn test_download_polls_until_idle() {
        let mock = MockTransport::new();
        mock.push_status(status_bytes(0, DfuState::DownloadBusy));
        mock.push_status(status_bytes(0, DfuState::DownloadBusy));
        mock.push_status(status_bytes(0, DfuState::DownloadIdle));

        let st = connection(&mock)
            .download_block(2, &[1, 2, 3], false)
            .unwrap()
            .unwrap();
        assert_eq!(st.state(), DfuState::DownloadIdle);
        assert_eq!(mock.status_reads(), 3);
        assert_eq!(mock.downloads(), vec![(2, vec![1, 2, 3])]);
    }

    #[test]
    fn test_download_returns_device_error() {
        let mock = MockTransport::new();
        mock.push_status(status_bytes(0, DfuState::DownloadBusy));
        mock.push_status(status_bytes(0x03, DfuState::DfuError));

        let st = connection(&mock)
            .download_block(2, &[0; 16], false)
            .unwrap()
            .unwrap();
        assert_eq!(st.state(), DfuState::DfuError);
        assert_eq!(st.status(), StatusCode::ErrWrite);
    }

    #[test]
    fn test_download_ignore_completion() {
        let mock = MockTransport::new();
        let st = connection(&mock).download_block(0, &[], true).unwrap();
        assert_eq!(st, None);
        assert_eq!(mock.status_reads(), 0);
        assert_eq!(mock.downloads(), vec![(0, vec![])]);
    }

    #[test]
    fn test_transient_status_failures() {
        let mock = MockTransport::new();
        mock.push_status_error(TransferError::Stall);
        mock.push_status(vec![0, 0, 0]);
        mock.push_status_error(TransferError::Fault);
        mock.push_status(status_bytes(0, DfuState::DownloadIdle));

        let st = connection(&mock)
            .download_block(2, &[0; 4], false)
            .unwrap()
            .unwrap();
        assert_eq!(st.state(), DfuState::DownloadIdle);
        assert_eq!(mock.status_reads(), 4);
    }

    #[test]
    fn test_transient_failure_budget() {
        let mock = MockTransport::new();
        for _ in 0..4 {
            mock.push_status_error(TransferError::Stall);
        }
        let err = connection(&mock)
            .download_block(2, &[0; 4], false)
            .unwrap_err();
        assert!(matches!(err, DfuError::Transfer(TransferError::Stall)));
        assert_eq!(mock.status_reads(), 4);
    }

    #[test]
    fn test_disconnect_aborts_polling() {
        let mock = MockTransport::new();
        mock.push_status(status_bytes(0, DfuState::DownloadBusy));
        mock.push_status_error(TransferError::Disconnected);
        mock.push_status(status_bytes(0, DfuState::DownloadIdle));

        let err = connection(&mock)
            .download_block(2, &[0; 4], false)
            .unwrap_err();
        assert!(matches!(
            err,
            DfuError::Transfer(TransferError::Disconnected)
        ));
        assert_eq!(mock.status_reads(), 2);
    }

    #[test]
    fn test_poll_ceiling() {
        let mock = MockTransport::new();
        mock.set_idle_status(status_bytes(0, DfuState::DownloadBusy));
        let err = connection(&mock)
            .download_block(2, &[0; 4], false)
            .unwrap_err();
        assert!(matches!(err, DfuError::Timeout));
        assert_eq!(mock.status_reads(), 50);
    }

    #[test]
    fn test_poll_wall_clock_timeout() {
        let mock = MockTransport::new();
        mock.set_idle_status(status_bytes(0, DfuState::DownloadBusy));
        let conn = DfuConnection::new(&mock, 2048).with_poll_policy(PollPolicy {
            max_polls: None,
            timeout: Some(Duration::from_millis(20)),
            max_transient_failures: 0,
            honor_poll_timeout: false,
        });
        let err = conn.download_block(2, &[0; 4], false).unwrap_err();
        assert!(matches!(err, DfuError::Timeout));
    }

    #[test]
    fn test_download_out_failure_propagates() {
        let mock = MockTransport::new();
        mock.fail_download(2, TransferError::Stall);
        let err = connection(&mock)
            .download_block(2, &[0; 4], false)
            .unwrap_err();
        assert!(matches!(err, DfuError::Transfer(TransferError::Stall)));
        assert_eq!(mock.status_reads(), 0);
    }

    #[test]
    fn test_set_address_command() {
        assert_eq!(
            set_address_command(0x0800_0000),
            [0x21, 0x00, 0x00, 0x00, 0x08]
        );

        let mock = MockTransport::new();
        connection(&mock).set_address(0x0800_4000).unwrap();
        assert_eq!(mock.downloads(), vec![(
            0,
            vec![0x21, 0x00, 0x40, 0x00, 0x08]
        )]);
    }

    #[test]
    fn test_detach() {
        let mock = MockTransport::new();
        connection(&mock).detach(1000).unwrap();
        assert_eq!(mock.requests(), vec![Request::Out {
            request: 0,
            value: 1000,
            data: vec![]
        }]);
    }

    #[test]
    fn test_detach_ignores_missing_ack() {
        let mock = MockTransport::new();
        mock.fail_request(0, TransferError::Disconnected);
        connection(&mock).detach(1000).unwrap();
        assert_eq!(mock.requests().len(), 1);
        assert_eq!(mock.status_reads(), 0);
    }

    #[test]
    fn test_reset_state_from_error() {
        let mock = MockTransport::new();
        mock.push_status(status_bytes(0x0a, DfuState::DfuError));
        mock.push_status(status_bytes(0, DfuState::DfuIdle));

        connection(&mock).reset_state().unwrap();
        let requests: Vec<u8> =
            mock.requests().iter().map(Request::code).collect();
        assert_eq!(requests, vec![3, 4, 3]);
    }

    #[test]
    fn test_reset_state_aborts_download() {
        let mock = MockTransport::new();
        mock.push_status(status_bytes(0, DfuState::DownloadIdle));
        mock.push_status(status_bytes(0, DfuState::DfuIdle));

        connection(&mock).reset_state().unwrap();
        let requests: Vec<u8> =
            mock.requests().iter().map(Request::code).collect();
        assert_eq!(requests, vec![3, 6, 3]);
    }
}
