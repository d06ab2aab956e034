//! Firmware download to STM32 bootloaders over USB DFU, based on [`nusb`]
//!
//! Implements the host side of the DFU protocol with the STMicroelectronics
//! extensions (aka "DfuSe") that the STM32 system bootloader understands:
//! device discovery, the DFU functional descriptor, `DFU_GETSTATUS` polling,
//! block-wise `DFU_DNLOAD` and `DFU_DETACH`.
//!
//! Useful references:
//! - DFU: [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//! - DfuSe: [STMicroelectronics AN3156](https://www.st.com/resource/en/application_note/an3156-usb-dfu-protocol-used-in-the-stm32-bootloader-stmicroelectronics.pdf)
//!
//! # Example
//!
//! Flash an image onto every STM32 bootloader attached:
//! ```no_run
//! use dfu::{FlashConfig, Flasher, STM_VENDOR_ID, find_dfu_devices};
//!
//! let image = std::fs::read("firmware.bin").unwrap();
//! for device in find_dfu_devices(Some(STM_VENDOR_ID), None).unwrap() {
//!     let connection = device.connect(0, 0).unwrap();
//!     let mut flasher = Flasher::new(connection, FlashConfig::default());
//!     if let Err(e) = flasher.run(&image, &mut ()) {
//!         println!("Error: {e}");
//!     }
//! }
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);

mod config;
mod connection;
mod descriptor;
mod device;
mod error;
mod flasher;
mod interface;
mod memory;
mod status;
mod transport;

#[cfg(test)]
mod mock;

use std::time::Duration;

// Re-exports
pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DETACH_TIMEOUT, DEFAULT_START_ADDRESS,
    FlashConfig, MAX_CHUNK_SIZE, PollPolicy, STM_VENDOR_ID,
};
pub use connection::{
    COMMAND_BLOCK, DfuConnection, FIRST_DATA_BLOCK, set_address_command,
};
pub use descriptor::{DFUSE_VERSION_NUMBER, DfuDescriptor, find_dfu_descriptor};
pub use device::{DfuDevice, find_dfu_devices};
pub use error::DfuError;
pub use flasher::{
    Block, CancelToken, Flasher, MAX_DATA_BLOCKS, Phase, Progress, data_blocks,
};
pub use interface::{DfuAltSetting, find_alt_setting};
pub use memory::{MemoryMap, MemoryRegion};
pub use status::{DfuState, DfuStatus, StatusCode};
pub use transport::{DfuTransport, UsbTransport};
