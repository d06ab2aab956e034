use std::time::Duration;

/// STMicroelectronics
pub const STM_VENDOR_ID: u16 = 0x0483;
/// Start of the main flash on STM32 parts
pub const DEFAULT_START_ADDRESS: u32 = 0x0800_0000;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// `DFU_DNLOAD` payloads are bounded by the 16-bit `wLength`
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;
pub const DEFAULT_DETACH_TIMEOUT: u16 = 1000;

/// How long to keep asking `DFU_GETSTATUS` after a `DFU_DNLOAD`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Give up after this many status reads
    pub max_polls: Option<u32>,
    /// Give up once this much time has passed since the request
    pub timeout: Option<Duration>,
    /// Consecutive transient status-read failures tolerated before the
    /// failure is returned
    pub max_transient_failures: u32,
    /// Sleep for the device-requested `bwPollTimeout` between reads
    pub honor_poll_timeout: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            max_polls: None,
            timeout: Some(crate::DEFAULT_TIMEOUT * 2),
            max_transient_failures: 8,
            honor_poll_timeout: true,
        }
    }
}

/// Parameters of a flashing session
///
/// `Default` gives the values the STM32 system bootloader works with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashConfig {
    /// Vendor ID used to discover devices
    pub vendor_id: u16,
    /// Flash address sent with the set-address command
    pub start_address: u32,
    /// Bytes per `DFU_DNLOAD` data block
    pub chunk_size: usize,
    /// Never send blocks larger than the device's `wTransferSize`
    pub clamp_to_transfer_size: bool,
    /// Abort as soon as the device reports an error status
    pub fail_on_device_error: bool,
    /// Send `DFU_DETACH` once the image is written
    pub detach: bool,
    /// `wValue` of the `DFU_DETACH` request, in milliseconds
    pub detach_timeout: u16,
    pub poll: PollPolicy,
}

impl Default for FlashConfig {
    fn default() -> Self {
        FlashConfig {
            vendor_id: STM_VENDOR_ID,
            start_address: DEFAULT_START_ADDRESS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            clamp_to_transfer_size: true,
            fail_on_device_error: true,
            detach: false,
            detach_timeout: DEFAULT_DETACH_TIMEOUT,
            poll: PollPolicy::default(),
        }
    }
}

impl FlashConfig {
    /// Data block size to use against a device advertising
    /// `transfer_size` (0 when unknown). Never above [MAX_CHUNK_SIZE].
    pub fn effective_chunk_size(&self, transfer_size: u16) -> usize {
        let chunk = self.chunk_size.clamp(1, MAX_CHUNK_SIZE);
        if self.clamp_to_transfer_size && transfer_size > 0 {
            chunk.min(transfer_size as usize)
        } else {
            chunk
        }
    }
}
