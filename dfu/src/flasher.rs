use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info, warn};

use crate::config::{FlashConfig, MAX_CHUNK_SIZE};
use crate::connection::{COMMAND_BLOCK, DfuConnection, FIRST_DATA_BLOCK};
use crate::error::DfuError;
use crate::status::DfuStatus;
use crate::transport::DfuTransport;

/// Highest number of data blocks addressable with a 16-bit `wValue`
pub const MAX_DATA_BLOCKS: usize = (u16::MAX - FIRST_DATA_BLOCK) as usize + 1;

/// One `DFU_DNLOAD` data block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block<'a> {
    pub number: u16,
    pub payload: &'a [u8],
}

/// Split `image` into data blocks of at most `chunk_size` bytes, numbered
/// from [FIRST_DATA_BLOCK].
pub fn data_blocks(
    image: &[u8],
    chunk_size: usize,
) -> Result<impl ExactSizeIterator<Item = Block<'_>>, DfuError> {
    let chunk_size = chunk_size.max(1);
    if image.len().div_ceil(chunk_size) > MAX_DATA_BLOCKS {
        return Err(DfuError::ImageTooLarge {
            len: image.len(),
            max: MAX_DATA_BLOCKS * chunk_size,
        });
    }
    Ok(image.chunks(chunk_size).enumerate().map(|(i, payload)| Block {
        number: FIRST_DATA_BLOCK + i as u16,
        payload,
    }))
}

/// Where a [Flasher] is in the download sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Erasing,
    /// Sending the data block with this index
    Transferring(usize),
    Finalizing,
    Detaching,
    Done,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::Erasing => write!(f, "erasing"),
            Phase::Transferring(i) => write!(f, "transferring block {i}"),
            Phase::Finalizing => write!(f, "finalizing"),
            Phase::Detaching => write!(f, "detaching"),
            Phase::Done => write!(f, "done"),
            Phase::Error => write!(f, "error"),
        }
    }
}

/// Receives progress of a [Flasher::run]
pub trait Progress {
    fn started(&mut self, _total_blocks: usize) {}
    fn block_written(&mut self, _completed: usize, _total_blocks: usize) {}
    fn finished(&mut self, _result: Result<(), &DfuError>) {}
}

impl Progress for () {}

/// Shared flag stopping a [Flasher] before its next block
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Writes a firmware image through the DfuSe bootloader
///
/// The sequence is: set-address command on block 0, data blocks from
/// block 2, an empty block 0 that makes the bootloader leave DFU mode and a
/// last status read the device usually no longer answers.
pub struct Flasher<T: DfuTransport> {
    connection: DfuConnection<T>,
    config: FlashConfig,
    cancel: Option<CancelToken>,
    phase: Phase,
}

impl<T: DfuTransport> Flasher<T> {
    pub fn new(connection: DfuConnection<T>, config: FlashConfig) -> Self {
        Flasher {
            connection: connection.with_poll_policy(config.poll),
            config,
            cancel: None,
            phase: Phase::Init,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn connection(&self) -> &DfuConnection<T> {
        &self.connection
    }

    pub fn into_connection(self) -> DfuConnection<T> {
        self.connection
    }

    /// Data block size for this device
    pub fn chunk_size(&self) -> usize {
        self.config
            .effective_chunk_size(self.connection.transfer_size())
    }

    /// Run the whole sequence. On failure the flasher is left in
    /// [Phase::Error] and the device holds a partially written image.
    pub fn run(
        &mut self,
        image: &[u8],
        progress: &mut dyn Progress,
    ) -> Result<(), DfuError> {
        let result = self.sequence(image, progress);
        if let Err(err) = &result {
            warn!("flashing aborted while {}: {err}", self.phase);
            self.phase = Phase::Error;
        }
        progress.finished(result.as_ref().copied());
        result
    }

    fn sequence(
        &mut self,
        image: &[u8],
        progress: &mut dyn Progress,
    ) -> Result<(), DfuError> {
        let chunk_size = self.chunk_size();
        if self.config.chunk_size > MAX_CHUNK_SIZE {
            warn!(
                "{} byte blocks exceed wLength, using {chunk_size} byte blocks",
                self.config.chunk_size
            );
        } else if chunk_size < self.config.chunk_size {
            warn!(
                "device transfer size is {} bytes, using {chunk_size} byte blocks instead of {}",
                self.connection.transfer_size(),
                self.config.chunk_size
            );
        }
        let blocks = data_blocks(image, chunk_size)?;
        let total = blocks.len();
        progress.started(total);

        self.check_cancelled()?;
        self.phase = Phase::Erasing;
        info!("setting address to {:#010x}", self.config.start_address);
        let st = self.connection.set_address(self.config.start_address)?;
        self.check_status(&st)?;

        info!("writing {} bytes in {total} blocks", image.len());
        for (i, block) in blocks.enumerate() {
            self.check_cancelled()?;
            self.phase = Phase::Transferring(i);
            debug!(
                "block {} ({} bytes) {}/{total}",
                block.number,
                block.payload.len(),
                i + 1
            );
            let st = self
                .connection
                .download_block(block.number, block.payload, false)?;
            if let Some(st) = st {
                self.check_status(&st)?;
            }
            progress.block_written(i + 1, total);
        }

        self.phase = Phase::Finalizing;
        info!("leaving DFU mode");
        match self.connection.download_block(COMMAND_BLOCK, &[], true) {
            Err(err) if err.is_disconnect() => {
                debug!("device reset before acknowledging the final block");
            }
            other => {
                other?;
            }
        }
        // the device is expected to be resetting by now
        match self.connection.get_status() {
            Ok(st) => debug!("final status: {st}"),
            Err(err) => debug!("final status read failed: {err}"),
        }

        if self.config.detach {
            self.phase = Phase::Detaching;
            self.connection.detach(self.config.detach_timeout)?;
        }

        self.phase = Phase::Done;
        Ok(())
    }

    fn check_status(&self, st: &DfuStatus) -> Result<(), DfuError> {
        if st.is_ok() {
            Ok(())
        } else if self.config.fail_on_device_error {
            st.ok()
        } else {
            warn!("device reported {st}, continuing");
            Ok(())
        }
    }

    fn check_cancelled(&self) -> Result<(), DfuError> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            Err(DfuError::Cancelled)
        } else {
            Ok(())
        }
    }
}
