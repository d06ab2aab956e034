use dfu::{DfuDevice, MemoryRegion, find_dfu_devices};

use crate::{CliError, DeviceFilter};

pub(crate) fn list_dfu_devices(filter: &DeviceFilter) -> Result<(), CliError> {
    let devices = find_dfu_devices(Some(filter.vendor), filter.product)?;
    if devices.is_empty() {
        println!("No DFU device found");
    } else {
        print_devices(&devices);
    }
    Ok(())
}

fn print_region(prefix: &str, region: &MemoryRegion) {
    let mut sector_size = region.sector_size();
    let size_char = if sector_size >= 1024 {
        sector_size /= 1024;
        "K"
    } else {
        " "
    };
    println!(
        "{}0x{:08X} {:3} sectors of {:4}{} bytes ({}{}{})",
        prefix,
        region.start(),
        region.sectors(),
        sector_size,
        size_char,
        if region.readable() { "r" } else { "" },
        if region.writable() { "w" } else { "" },
        if region.erasable() { "e" } else { "" },
    );
}

fn print_devices(devices: &[DfuDevice]) {
    for (index, device) in devices.iter().enumerate() {
        let transfer_size = match device.transfer_size() {
            Ok(size) => format!("{size}"),
            Err(err) => format!("? ({err})"),
        };
        println!(
            "#{} Bus {} Device {:03}: ID {:04x}:{:04x} {} (serial {}, transfer size {})",
            index,
            device.bus_id(),
            device.device_address(),
            device.vendor_id(),
            device.product_id(),
            device.product_string().unwrap_or(""),
            device.serial_number().unwrap_or("?"),
            transfer_size,
        );

        let alt_settings = match device.alt_settings() {
            Ok(alt_settings) => alt_settings,
            Err(err) => {
                println!("  cannot read interfaces: {err}");
                continue;
            }
        };
        for alt in alt_settings {
            println!(
                "  {} (intf={}, alt={}):",
                alt.name().unwrap_or("<unnamed>"),
                alt.interface(),
                alt.alt_setting(),
            );
            if let Some(memory) = alt.memory() {
                for region in &memory.regions {
                    print_region("    ", region);
                }
            }
        }
    }
}
