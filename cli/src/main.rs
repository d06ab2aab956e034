use std::{fs, path::PathBuf, process::ExitCode, time::Duration};

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use parse_size::parse_size;

use dfu::{
    DEFAULT_DETACH_TIMEOUT, DfuDevice, FlashConfig, MAX_CHUNK_SIZE,
    STM_VENDOR_ID, find_dfu_devices,
};
use detach::*;
use error::CliError;
use flash::*;
use list::*;
use status::*;

mod detach;
mod error;
mod flash;
mod list;
mod progress;
mod status;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Copy)]
struct DeviceFilter {
    /// vendor ID (ex: "0483")
    #[clap(short, long, value_parser=hex_u16, default_value = "0483")]
    vendor: u16,
    /// product ID (ex: "df11")
    #[clap(short, long, value_parser=hex_u16)]
    product: Option<u16>,
    /// position of the device in `list` output
    #[clap(short, long)]
    index: Option<usize>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        DeviceFilter {
            vendor: STM_VENDOR_ID,
            product: None,
            index: None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU devices
    List {
        #[command(flatten)]
        filter: DeviceFilter,
    },
    /// write a raw binary image to the device(s)
    Flash {
        /// firmware image (raw binary)
        file: PathBuf,
        #[command(flatten)]
        filter: DeviceFilter,
        /// flash every matching device, one after the other
        #[clap(short, long, conflicts_with = "index")]
        all: bool,
        /// clear a pending device error before flashing
        #[clap(long)]
        reset: bool,
        #[command(flatten)]
        options: FlashOptions,
    },
    /// show the DFU status of a device
    Status {
        #[command(flatten)]
        filter: DeviceFilter,
    },
    /// leave DFU mode
    Detach {
        #[command(flatten)]
        filter: DeviceFilter,
        /// detach every matching device
        #[clap(short, long, conflicts_with = "index")]
        all: bool,
        /// detach timeout hint in milliseconds
        #[clap(short, long, default_value_t = DEFAULT_DETACH_TIMEOUT)]
        timeout: u16,
    },
}

#[derive(Args)]
struct FlashOptions {
    /// start address (ex: 0x08000000)
    #[clap(short, long, value_parser=maybe_hex::<u32>)]
    start_address: Option<u32>,
    /// bytes per download block, at most 65535 (ex: 1024, 2KiB)
    #[clap(short, long, value_parser=parse_chunk_size)]
    chunk_size: Option<usize>,
    /// send blocks of the requested size even if the device
    /// advertises a smaller transfer size
    #[clap(long)]
    no_clamp: bool,
    /// send DFU_DETACH once the image is written
    #[clap(long)]
    detach: bool,
    /// keep going when the device reports an error status
    #[clap(long)]
    best_effort: bool,
    /// seconds to wait for the device after each block (0: forever)
    #[clap(long)]
    timeout: Option<u64>,
    /// maximum status reads after each block
    #[clap(long)]
    max_polls: Option<u32>,
}

impl FlashOptions {
    fn config(&self, vendor_id: u16) -> FlashConfig {
        let mut config = FlashConfig {
            vendor_id,
            clamp_to_transfer_size: !self.no_clamp,
            fail_on_device_error: !self.best_effort,
            detach: self.detach,
            ..FlashConfig::default()
        };
        if let Some(addr) = self.start_address {
            config.start_address = addr;
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(secs) = self.timeout {
            config.poll.timeout =
                (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.poll.max_polls = self.max_polls;
        config
    }
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List {
            filter: DeviceFilter::default(),
        }
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| format!("{e}"))
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    let size = parse_size(s).map_err(|e| format!("{e}"))?;
    match usize::try_from(size) {
        Ok(0) => Err("chunk size must not be zero".to_string()),
        Ok(size) if size > MAX_CHUNK_SIZE => {
            Err(format!("chunk size must not exceed {MAX_CHUNK_SIZE}"))
        }
        Ok(size) => Ok(size),
        Err(e) => Err(format!("{e}")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(err) = match cli.command.unwrap_or_default() {
        Commands::List { filter } => list_dfu_devices(&filter),
        Commands::Flash {
            file,
            filter,
            all,
            reset,
            options,
        } => {
            let config = options.config(filter.vendor);
            flash_file(&file, &filter, all, &config, reset)
        }
        Commands::Status { filter } => status_cmd(&filter),
        Commands::Detach {
            filter,
            all,
            timeout,
        } => detach_cmd(&filter, all, timeout),
    } {
        eprintln!("Error: {err}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Devices of `vendor_id` matching `filter`, narrowed down to one unless
/// `all` is set
fn get_dfu_devices(
    vendor_id: u16,
    filter: &DeviceFilter,
    all: bool,
) -> Result<Vec<DfuDevice>, CliError> {
    let mut devices = find_dfu_devices(Some(vendor_id), filter.product)?;
    if devices.is_empty() {
        return Err(CliError::NoDFUDevice);
    }

    if let Some(index) = filter.index {
        if index >= devices.len() {
            return Err(CliError::InvalidIndex(index, devices.len()));
        }
        return Ok(vec![devices.swap_remove(index)]);
    }

    if devices.len() > 1 && !all {
        return Err(CliError::ManyDFUDevices);
    }

    Ok(devices)
}

fn flash_file(
    file: &PathBuf,
    filter: &DeviceFilter,
    all: bool,
    config: &FlashConfig,
    reset: bool,
) -> Result<(), CliError> {
    let devices = get_dfu_devices(config.vendor_id, filter, all)?;
    let image = fs::read(file)?;
    flash(&image, devices, config, reset)
}

fn status_cmd(filter: &DeviceFilter) -> Result<(), CliError> {
    let devices = get_dfu_devices(filter.vendor, filter, false)?;
    print_status(&devices)
}

fn detach_cmd(
    filter: &DeviceFilter,
    all: bool,
    timeout: u16,
) -> Result<(), CliError> {
    let devices = get_dfu_devices(filter.vendor, filter, all)?;
    detach(&devices, timeout)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_hex_ids() {
        assert_eq!(hex_u16("0483"), Ok(0x0483));
        assert_eq!(hex_u16("0xdf11"), Ok(0xdf11));
        assert!(hex_u16("xyz").is_err());
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(parse_chunk_size("1024"), Ok(1024));
        assert_eq!(parse_chunk_size("2K"), Ok(2000));
        assert_eq!(parse_chunk_size("2KiB"), Ok(2048));
        assert!(parse_chunk_size("0").is_err());
        assert_eq!(parse_chunk_size("65535"), Ok(65535));
        assert!(parse_chunk_size("70000").is_err());
        assert!(parse_chunk_size("64KiB").is_err());
    }

    #[test]
    fn test_flash_args() {
        let cli = Cli::try_parse_from([
            "stflash", "flash", "fw.bin", "--all", "-s", "0x08004000", "-c",
            "512",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Flash {
                filter,
                all,
                options,
                ..
            }) => {
                assert_eq!(filter.vendor, STM_VENDOR_ID);
                assert!(all);
                assert_eq!(options.start_address, Some(0x0800_4000));
                assert_eq!(options.chunk_size, Some(512));
            }
            _ => panic!("expected flash command"),
        }

        assert!(
            Cli::try_parse_from([
                "stflash", "flash", "fw.bin", "--all", "-i", "1"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_flash_config() {
        let cli = Cli::try_parse_from([
            "stflash", "flash", "fw.bin", "-v", "1209", "--no-clamp",
            "--best-effort", "--timeout", "0", "--max-polls", "20",
        ])
        .unwrap();
        let Some(Commands::Flash {
            filter, options, ..
        }) = cli.command
        else {
            panic!("expected flash command");
        };
        let config = options.config(filter.vendor);
        assert_eq!(config.vendor_id, 0x1209);
        assert_eq!(config.start_address, 0x0800_0000);
        assert_eq!(config.chunk_size, 1024);
        assert!(!config.clamp_to_transfer_size);
        assert!(!config.fail_on_device_error);
        assert!(!config.detach);
        assert_eq!(config.poll.timeout, None);
        assert_eq!(config.poll.max_polls, Some(20));
    }
}
