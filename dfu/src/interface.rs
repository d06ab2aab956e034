use std::{num::NonZeroU8, time::Duration};

use nusb::{self, MaybeFuture};

use crate::memory::MemoryMap;

/// DFU alternate setting of a device, named after its `iInterface` string
#[derive(Clone, Debug)]
pub struct DfuAltSetting {
    interface: u8,
    alt_setting: u8,
    name: Option<String>,
    memory: Option<MemoryMap>,
}

impl DfuAltSetting {
    pub(crate) fn new(
        device: &nusb::Device,
        interface: u8,
        alt_setting: u8,
        name_idx: Option<NonZeroU8>,
    ) -> Self {
        let name = name_idx.and_then(|idx| {
            get_string_descriptor(device, idx, crate::DEFAULT_TIMEOUT)
        });
        Self::with_name(interface, alt_setting, name)
    }

    fn with_name(interface: u8, alt_setting: u8, name: Option<String>) -> Self {
        let memory = name.as_deref().and_then(MemoryMap::parse);
        Self {
            interface,
            alt_setting,
            name,
            memory,
        }
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    /// DfuSe memory map, when the name is a layout string
    pub fn memory(&self) -> Option<&MemoryMap> {
        self.memory.as_ref()
    }
}

/// Alternate setting whose memory map covers `addr`
///
/// Each memory of a DfuSe device (internal flash, option bytes, ...) is
/// exposed on its own alternate setting, which has to be selected before
/// addressing it.
pub fn find_alt_setting(
    alt_settings: &[DfuAltSetting],
    addr: u32,
) -> Option<&DfuAltSetting> {
    alt_settings.iter().find(|alt| {
        alt.memory()
            .is_some_and(|memory| memory.region_for(addr).is_some())
    })
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
    timeout: Duration,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(timeout)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, timeout)
        .wait()
        .ok()
}
