use log::{debug, warn};

use dfu::{DfuDevice, DfuError, FlashConfig, Flasher, find_alt_setting};

use crate::{CliError, progress::ProgressBar};

/// Flash `image` onto each device in turn. A failing device does not stop
/// the others.
pub(crate) fn flash(
    image: &[u8],
    devices: Vec<DfuDevice>,
    config: &FlashConfig,
    reset: bool,
) -> Result<(), CliError> {
    flash_each(&devices, describe, |device| {
        flash_device(image, device, config, reset)
    })
}

fn describe(device: &DfuDevice) -> String {
    format!(
        "{:04x}:{:04x} serial {}",
        device.vendor_id(),
        device.product_id(),
        device.serial_number().unwrap_or("?"),
    )
}

fn flash_each<D>(
    devices: &[D],
    describe: impl Fn(&D) -> String,
    mut flash_one: impl FnMut(&D) -> Result<(), DfuError>,
) -> Result<(), CliError> {
    let total = devices.len();
    let mut failed = 0;

    for (n, device) in devices.iter().enumerate() {
        println!("Flashing device {}/{}: {}", n + 1, total, describe(device));
        if let Err(err) = flash_one(device) {
            eprintln!("  Failed: {err}");
            failed += 1;
        }
    }

    if failed > 0 {
        Err(CliError::FlashFailed { failed, total })
    } else {
        Ok(())
    }
}

fn flash_device(
    image: &[u8],
    device: &DfuDevice,
    config: &FlashConfig,
    reset: bool,
) -> Result<(), DfuError> {
    let (interface, alt_setting) =
        select_alt_setting(device, config.start_address, image.len());

    let connection = device.connect(interface, alt_setting)?;
    if reset {
        println!("  Resetting device state...");
        connection.reset_state()?;
    }

    let mut flasher = Flasher::new(connection, config.clone());
    flasher.run(image, &mut ProgressBar)
}

/// Interface and alternate setting exposing the memory at `start_address`,
/// the first DFU interface when the device advertises no memory map for it.
fn select_alt_setting(
    device: &DfuDevice,
    start_address: u32,
    len: usize,
) -> (u8, u8) {
    let alt_settings = match device.alt_settings() {
        Ok(alt_settings) => alt_settings,
        Err(err) => {
            debug!("cannot read memory layout: {err}");
            return (0, 0);
        }
    };
    let Some(alt) = find_alt_setting(&alt_settings, start_address) else {
        if alt_settings.iter().any(|alt| alt.memory().is_some()) {
            warn!("no memory region advertised at {start_address:#010x}");
        }
        return (0, 0);
    };

    if let Some(memory) =
        alt.memory().filter(|memory| !memory.fits(start_address, len))
    {
        warn!(
            "{len} bytes at {start_address:#010x} do not fit in writable \"{}\" ({:#010x}..{:#010x})",
            memory.name,
            memory.start(),
            memory.end()
        );
    }
    debug!(
        "using \"{}\" (intf={}, alt={})",
        alt.name().unwrap_or(""),
        alt.interface(),
        alt.alt_setting()
    );
    (alt.interface(), alt.alt_setting())
}
