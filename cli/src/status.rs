use dfu::DfuDevice;

use crate::CliError;

pub(crate) fn print_status(devices: &[DfuDevice]) -> Result<(), CliError> {
    for device in devices {
        let connection = device.connect(0, 0)?;
        let status = connection.get_status()?;
        println!(
            "Bus {} Device {:03}: {}",
            device.bus_id(),
            device.device_address(),
            status
        );
    }
    Ok(())
}
