use log::debug;
use nusb::{self, MaybeFuture};

use crate::{
    DfuConnection, DfuError,
    descriptor::{DfuDescriptor, find_interface_dfu_descriptor, is_dfu_class},
    interface::DfuAltSetting,
    transport::UsbTransport,
};

/// Attached USB device, possibly in DFU mode
///
/// Only holds the enumeration data; the device is opened on demand.
pub struct DfuDevice {
    dev: nusb::DeviceInfo,
}

impl DfuDevice {
    pub fn device_info(&self) -> &nusb::DeviceInfo {
        &self.dev
    }

    pub fn bus_id(&self) -> &str {
        self.dev.bus_id()
    }

    pub fn device_address(&self) -> u8 {
        self.dev.device_address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.dev.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.dev.product_id()
    }

    pub fn product_string(&self) -> Option<&str> {
        self.dev.product_string()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.dev.serial_number()
    }

    /// Whether the device advertises a DFU class interface
    pub fn has_dfu_interface(&self) -> bool {
        self.dev
            .interfaces()
            .any(|i| is_dfu_class(i.class(), i.subclass()))
    }

    fn open(&self) -> Result<nusb::Device, DfuError> {
        Ok(self.dev.open().wait()?)
    }

    /// DFU functional descriptor, looked up across the DFU class alternate
    /// settings of all configurations
    pub fn dfu_descriptor(&self) -> Result<DfuDescriptor, DfuError> {
        let open_dev = self.open()?;
        let mut alt_settings: Vec<(u8, u8, Vec<Vec<u8>>)> = Vec::new();
        for config in open_dev.configurations() {
            for alt in config.interface_alt_settings() {
                alt_settings.push((
                    alt.class(),
                    alt.subclass(),
                    alt.descriptors().map(|d| d.to_vec()).collect(),
                ));
            }
        }
        find_interface_dfu_descriptor(alt_settings.iter().map(
            |(class, subclass, blocks)| {
                (*class, *subclass, blocks.iter().map(Vec::as_slice))
            },
        ))
        .ok_or(DfuError::DescriptorNotFound)
    }

    /// Maximum `DFU_DNLOAD` payload negotiated by the device
    /// (`wTransferSize`)
    pub fn transfer_size(&self) -> Result<u16, DfuError> {
        Ok(self.dfu_descriptor()?.transfer_size())
    }

    /// DFU alternate settings of the active configurations
    pub fn alt_settings(&self) -> Result<Vec<DfuAltSetting>, DfuError> {
        let open_dev = self.open()?;
        let mut alt_settings = Vec::new();
        for config in open_dev.configurations() {
            for alt in config.interface_alt_settings() {
                if is_dfu_class(alt.class(), alt.subclass()) {
                    alt_settings.push(DfuAltSetting::new(
                        &open_dev,
                        alt.interface_number(),
                        alt.alternate_setting(),
                        alt.string_index(),
                    ));
                }
            }
        }
        Ok(alt_settings)
    }

    /// Claim the DFU interface and start a session on it
    pub fn connect(
        &self,
        interface: u8,
        alt_setting: u8,
    ) -> Result<DfuConnection, DfuError> {
        let xfer_size = self.transfer_size()?;
        debug!(
            "{:04x}:{:04x} transfer size {xfer_size}",
            self.vendor_id(),
            self.product_id()
        );
        let dev = self.open()?;
        let interface = dev.claim_interface(interface).wait()?;
        interface.set_alt_setting(alt_setting).wait()?;
        Ok(DfuConnection::new(UsbTransport::new(interface), xfer_size))
    }
}

/// Attached devices matching the given vendor and product IDs
///
/// No matching device is not an error: the list is simply empty.
pub fn find_dfu_devices(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<Vec<DfuDevice>, DfuError> {
    Ok(nusb::list_devices()
        .wait()?
        .filter(|dev| {
            vid.is_none_or(|id| dev.vendor_id() == id)
                && pid.is_none_or(|id| dev.product_id() == id)
        })
        .map(|dev| DfuDevice { dev })
        .collect())
}
