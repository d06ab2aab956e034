use dfu::DfuDevice;

use crate::CliError;

pub(crate) fn detach(
    devices: &[DfuDevice],
    timeout_ms: u16,
) -> Result<(), CliError> {
    for device in devices {
        println!(
            "Leaving DFU: Bus {} Device {:03}...",
            device.bus_id(),
            device.device_address()
        );
        let connection = device.connect(0, 0)?;
        connection.detach(timeout_ms)?;
    }
    Ok(())
}
