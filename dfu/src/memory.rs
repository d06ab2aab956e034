use std::sync::LazyLock;

use nonempty::NonEmpty;
use regex::Regex;

// "@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg"
static LAYOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@?\s*([^/]*?)\s*/0x([\da-fA-F]+)U?/(.*)$").unwrap()
});
static SECTORS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*\*\s*(\d+)\s*([KMB ]?)([a-g])").unwrap()
});

/// DfuSe memory map advertised in an alternate setting's name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryMap {
    pub name: String,
    pub regions: NonEmpty<MemoryRegion>,
}

/// Run of equally sized sectors sharing the same access rights
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    start: u32,
    end: u32,
    sector_size: u32,
    access: u8,
}

impl MemoryMap {
    /// Parse a DfuSe layout string, `None` if it is not one.
    pub fn parse(desc: &str) -> Option<Self> {
        let captures = LAYOUT_RE.captures(desc.trim())?;
        let mut addr = u32::from_str_radix(&captures[2], 16).ok()?;

        let mut regions = Vec::new();
        for sectors in SECTORS_RE.captures_iter(&captures[3]) {
            let count: u32 = sectors[1].parse().ok()?;
            let size: u32 = sectors[2].parse().ok()?;
            let sector_size = match &sectors[3] {
                "K" => size.checked_mul(1024)?,
                "M" => size.checked_mul(1024 * 1024)?,
                _ => size,
            };
            let end = addr.checked_add(count.checked_mul(sector_size)?)?;
            regions.push(MemoryRegion {
                start: addr,
                end,
                sector_size,
                access: sectors[4].as_bytes()[0] & 0x7,
            });
            addr = end;
        }

        Some(MemoryMap {
            name: captures[1].to_string(),
            regions: NonEmpty::from_vec(regions)?,
        })
    }

    pub fn start(&self) -> u32 {
        self.regions.first().start
    }

    pub fn end(&self) -> u32 {
        self.regions.last().end
    }

    pub fn region_for(&self, addr: u32) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Whether `len` bytes from `start` stay inside writable regions
    pub fn fits(&self, start: u32, len: usize) -> bool {
        if len == 0 {
            return self.region_for(start).is_some();
        }
        let Some(last) = u32::try_from(len - 1)
            .ok()
            .and_then(|l| start.checked_add(l))
        else {
            return false;
        };
        self.regions
            .iter()
            .filter(|r| r.end > start && r.start <= last)
            .all(MemoryRegion::writable)
            && self.region_for(start).is_some()
            && self.region_for(last).is_some()
    }
}

impl MemoryRegion {
    pub fn start(&self) -> u32 {
        self.start
    }
    /// First address past the region
    pub fn end(&self) -> u32 {
        self.end
    }
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }
    pub fn sectors(&self) -> u32 {
        (self.end - self.start) / self.sector_size.max(1)
    }
    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr < self.end
    }
    pub fn readable(&self) -> bool {
        self.access & 1 != 0
    }
    pub fn erasable(&self) -> bool {
        self.access & 2 != 0
    }
    pub fn writable(&self) -> bool {
        self.access & 4 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F4_FLASH: &str =
        "@Internal Flash  /0x08000000/04*016Kg,01*064Kg,07*128Kg";

    #[test]
    fn test_parse_layout() {
        let map = MemoryMap::parse(F4_FLASH).unwrap();
        assert_eq!(map.name, "Internal Flash");
        assert_eq!(map.regions.len(), 3);
        assert_eq!(map.start(), 0x0800_0000);
        assert_eq!(map.end(), 0x0810_0000);

        let first = map.regions.first();
        assert_eq!(first.sector_size(), 16 * 1024);
        assert_eq!(first.sectors(), 4);
        assert!(first.readable() && first.erasable() && first.writable());
        assert_eq!(map.regions.get(1).map(MemoryRegion::start), Some(0x0801_0000));
    }

    #[test]
    fn test_parse_option_bytes() {
        let map = MemoryMap::parse("@Option Bytes  /0x1FFFC000/01*016 e")
            .unwrap();
        assert_eq!(map.name, "Option Bytes");
        let region = map.regions.first();
        assert_eq!(region.start(), 0x1FFF_C000);
        assert_eq!(region.end(), 0x1FFF_C010);
        assert!(region.readable());
        assert!(!region.erasable());
        assert!(region.writable());
    }

    #[test]
    fn test_parse_rejects_plain_names() {
        assert_eq!(MemoryMap::parse("STM32 BOOTLOADER"), None);
        assert_eq!(MemoryMap::parse("@Flash /0x08000000/"), None);
    }

    #[test]
    fn test_fits() {
        let map = MemoryMap::parse(F4_FLASH).unwrap();
        assert!(map.fits(0x0800_0000, 2500));
        assert!(map.fits(0x0800_0000, 1024 * 1024));
        assert!(!map.fits(0x0800_0000, 1024 * 1024 + 1));
        assert!(!map.fits(0x0700_0000, 16));
        assert!(map.fits(0x0800_0000, 0));

        let otp = MemoryMap::parse("@OTP Memory /0x1FFF7800/01*512 a")
            .unwrap();
        assert!(!otp.fits(0x1FFF_7800, 16));
    }
}
