pub(crate) const DFU_CLASS: u8 = 0xFE;
pub(crate) const DFU_SUBCLASS: u8 = 0x1;
pub(crate) const DFU_DESC_TYPE: u8 = 0x21;
// up to and including wTransferSize
const DFU_DESC_MIN_LEN: usize = 7;

pub const DFUSE_VERSION_NUMBER: u16 = 0x11A;

/// DFU functional descriptor
///
/// Represents the DFU functional descriptor as described in section 4.1.3.
/// Some bootloaders report the DFU 1.0 layout which stops after
/// `wTransferSize`, hence the optional version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfuDescriptor {
    attributes: u8,
    detach_timeout: u16,
    transfer_size: u16,
    dfu_version: Option<u16>,
}

impl DfuDescriptor {
    const BIT_CAN_DNLOAD: u8 = 1 << 0;
    const BIT_CAN_UPLOAD: u8 = 1 << 1;
    const BIT_MANIFESTATION_TOLERANT: u8 = 1 << 2;
    const BIT_WILL_DETACH: u8 = 1 << 3;

    /// Decode a class-specific descriptor block.
    ///
    /// Returns `None` unless the block is a DFU functional descriptor
    /// (`bDescriptorType` = 0x21) long enough to carry `wTransferSize`.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < DFU_DESC_MIN_LEN || raw[1] != DFU_DESC_TYPE {
            return None;
        }
        Some(Self {
            attributes: raw[2],
            detach_timeout: u16::from_le_bytes([raw[3], raw[4]]),
            transfer_size: u16::from_le_bytes([raw[5], raw[6]]),
            dfu_version: raw
                .get(7..9)
                .map(|v| u16::from_le_bytes([v[0], v[1]])),
        })
    }

    #[doc(alias = "bitCanDnload")]
    pub fn can_download(&self) -> bool {
        self.attributes & Self::BIT_CAN_DNLOAD != 0
    }

    #[doc(alias = "bitCanUpload")]
    pub fn can_upload(&self) -> bool {
        self.attributes & Self::BIT_CAN_UPLOAD != 0
    }

    /// Device still talks USB after the Manifestation phase
    #[doc(alias = "bitManifestationTolerant")]
    pub fn manifestation_tolerant(&self) -> bool {
        self.attributes & Self::BIT_MANIFESTATION_TOLERANT != 0
    }

    /// Device performs the bus detach-attach sequence itself on `DFU_DETACH`
    #[doc(alias = "bitWillDetach")]
    pub fn will_detach(&self) -> bool {
        self.attributes & Self::BIT_WILL_DETACH != 0
    }

    /// Longest time, in milliseconds, the device waits for a USB reset after
    /// `DFU_DETACH` (`wDetachTimeOut`)
    #[doc(alias = "wDetachTimeout")]
    pub fn detach_timeout(&self) -> u16 {
        self.detach_timeout
    }

    /// Maximum number of bytes the device accepts per control-write
    /// transaction (`wTransferSize`)
    #[doc(alias = "wTransferSize")]
    pub fn transfer_size(&self) -> u16 {
        self.transfer_size
    }

    #[doc(alias = "bcdDFUVersion")]
    pub fn dfu_version(&self) -> Option<u16> {
        self.dfu_version
    }

    pub fn is_dfuse(&self) -> bool {
        self.dfu_version == Some(DFUSE_VERSION_NUMBER)
    }
}

/// First DFU functional descriptor among class-specific descriptor blocks,
/// in configuration / interface order.
pub fn find_dfu_descriptor<'a>(
    blocks: impl IntoIterator<Item = &'a [u8]>,
) -> Option<DfuDescriptor> {
    blocks.into_iter().find_map(DfuDescriptor::parse)
}

pub(crate) fn is_dfu_class(class: u8, subclass: u8) -> bool {
    class == DFU_CLASS && subclass == DFU_SUBCLASS
}

/// DFU functional descriptor of the first DFU class alternate setting,
/// given as `(bInterfaceClass, bInterfaceSubClass, descriptor blocks)`.
///
/// Other classes are skipped: the HID descriptor shares type 0x21.
pub(crate) fn find_interface_dfu_descriptor<'a, B>(
    alt_settings: impl IntoIterator<Item = (u8, u8, B)>,
) -> Option<DfuDescriptor>
where
    B: IntoIterator<Item = &'a [u8]>,
{
    alt_settings
        .into_iter()
        .filter(|(class, subclass, _)| is_dfu_class(*class, *subclass))
        .find_map(|(_, _, blocks)| find_dfu_descriptor(blocks))
}
