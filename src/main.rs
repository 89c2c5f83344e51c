// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fmt::Display;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use bootcast::dhcp::{DhcpConfiguration, format_mac};
use bootcast::duration::parse_duration;
use bootcast::leases::{read_apple_leases_file, read_dhcpd_leases_file};
use bootcast::netmap::{NetworkMap, NetworkNameMapper};
use bootcast::networking::NetworkingConfig;
use bootcast::pcxt::hex_frame;
use bootcast::{
    BootConfig, BootDriver, DriverKind, PcXtDriver, PlaybackEngine, UsbDriver, VncDriver,
};

#[derive(Parser)]
#[command(name = "bootcast")]
#[command(about = "Type boot commands into virtual machines", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a boot command and list what it would type
    Check {
        /// TOML boot configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Boot command, overriding the one in the configuration
        boot_command: Option<String>,
    },

    /// Type a boot command through a driver that prints every event
    Play {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        driver: Option<DriverKind>,

        /// Delay before typing starts, e.g. "2s"
        #[arg(long, value_parser = parse_duration)]
        boot_wait: Option<Duration>,

        boot_command: Option<String>,
    },

    /// Inspect a dhcpd.conf
    Dhcp {
        path: PathBuf,

        /// Show the host declaration with this name
        #[arg(long)]
        host: Option<String>,

        /// Show the subnet containing this address
        #[arg(long)]
        subnet: Option<IpAddr>,
    },

    /// Inspect a netmap.conf
    Netmap {
        path: PathBuf,

        /// Look up the devices for a network name
        #[arg(long, conflicts_with = "device")]
        name: Option<String>,

        /// Look up the network name for a device
        #[arg(long)]
        device: Option<String>,
    },

    /// Inspect a VMware Fusion networking file
    Networking {
        path: PathBuf,

        /// Look up the devices for a network type: hostonly, nat or bridged
        #[arg(long, conflicts_with = "device")]
        name: Option<String>,

        /// Look up the network type for a device
        #[arg(long)]
        device: Option<String>,
    },

    /// List the entries of a DHCP lease database
    Leases {
        path: PathBuf,

        /// Read the macOS dhcpd_leases format
        #[arg(long)]
        apple: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>, boot_command: Option<String>) -> Result<BootConfig> {
    let mut config = match path {
        Some(path) => BootConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => BootConfig::default(),
    };
    if let Some(command) = boot_command {
        config.boot_command = vec![command];
    }

    let errors = config.prepare();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("error: {error}");
        }
        bail!("{} problem(s) found in boot configuration", errors.len());
    }
    Ok(config)
}

fn dry_run_driver(config: &BootConfig) -> Box<dyn BootDriver> {
    let pacing = config.pacing();
    match config.driver {
        DriverKind::Vnc => Box::new(VncDriver::new(
            |sym, down| {
                println!("keysym {sym:#06x} {}", if down { "down" } else { "up" });
                Ok(())
            },
            pacing,
        )),
        DriverKind::Usb => Box::new(UsbDriver::new(
            |code, down| {
                println!("hid {code} {}", if down { "down" } else { "up" });
                Ok(())
            },
            pacing,
        )),
        DriverKind::PcXt => Box::new(PcXtDriver::new(
            |frame: &[u8]| {
                println!("scancodes {}", hex_frame(frame));
                Ok(())
            },
            config.scancode_chunk_size,
            pacing,
        )),
    }
}

async fn play(config: BootConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl-C, stopping boot command...");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut engine =
        PlaybackEngine::new(dry_run_driver(&config), cancel).with_boot_wait(config.boot_wait);

    engine
        .execute(&config.flat_boot_command())
        .await
        .context("Failed to type boot command")
}

/// Exit status for a run stopped with Ctrl-C.
const CANCELLED_STATUS: u8 = 130;

fn was_cancelled(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<bootcast::Error>()
        .is_some_and(bootcast::Error::is_cancelled)
}

fn dhcp(path: &Path, host: Option<&str>, subnet: Option<IpAddr>) -> Result<()> {
    let config = DhcpConfiguration::read(path)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if let Some(host) = host {
        let declaration = config.host_by_name(host)?;
        print!("{declaration}");
        if let Ok(mac) = declaration.hardware() {
            println!("hardware : {}", format_mac(&mac));
        }
        if let Ok(ip) = declaration.ip4() {
            println!("ip4 : {ip}");
        }
        if let Ok(ip) = declaration.ip6() {
            println!("ip6 : {ip}");
        }
        return Ok(());
    }

    if let Some(address) = subnet {
        print!("{}", config.subnet_by_address(address)?);
        return Ok(());
    }

    for declaration in config.declarations() {
        println!("{declaration}");
    }
    Ok(())
}

fn print_mapping(
    mapper: &(impl NetworkNameMapper + Display),
    name: Option<&str>,
    device: Option<&str>,
) -> Result<()> {
    match (name, device) {
        (Some(name), _) => println!("{}", mapper.name_into_devices(name)?.join("\n")),
        (None, Some(device)) => println!("{}", mapper.device_into_name(device)?),
        (None, None) => print!("{mapper}"),
    }
    Ok(())
}

fn netmap(path: &Path, name: Option<&str>, device: Option<&str>) -> Result<()> {
    let map =
        NetworkMap::read(path).with_context(|| format!("Failed to parse {}", path.display()))?;
    print_mapping(&map, name, device)
}

fn networking(path: &Path, name: Option<&str>, device: Option<&str>) -> Result<()> {
    let config = NetworkingConfig::read(path)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    print_mapping(&config, name, device)
}

fn leases(path: &Path, apple: bool) -> Result<()> {
    let context = || format!("Failed to read {}", path.display());

    let errors = if apple {
        let leases = read_apple_leases_file(path).with_context(context)?;
        for entry in &leases.entries {
            let expires = entry
                .expires()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into());
            println!(
                "{}\t{}\t{}\t{expires}",
                entry.ip_address,
                format_mac(&entry.hw_address),
                entry.name.as_deref().unwrap_or("-"),
            );
        }
        leases.errors
    } else {
        let leases = read_dhcpd_leases_file(path).with_context(context)?;
        for entry in &leases.entries {
            let ends = entry
                .ends
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".into());
            println!("{}\t{}\t{ends}", entry.address, format_mac(&entry.ether));
        }
        leases.errors
    };

    for error in &errors {
        eprintln!("warning: {error}");
    }
    Ok(())
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Check {
            config,
            boot_command,
        } => {
            let config = load_config(config.as_deref(), boot_command)?;
            let sequence = bootcast::parse(&config.flat_boot_command())?;
            for expression in &sequence {
                println!("{expression}");
            }
        }
        Command::Play {
            config,
            driver,
            boot_wait,
            boot_command,
        } => {
            let mut config = load_config(config.as_deref(), boot_command)?;
            if let Some(driver) = driver {
                config.driver = driver;
            }
            if let Some(boot_wait) = boot_wait {
                config.boot_wait = boot_wait;
            }
            play(config).await?;
        }
        Command::Dhcp { path, host, subnet } => dhcp(&path, host.as_deref(), subnet)?,
        Command::Netmap { path, name, device } => {
            netmap(&path, name.as_deref(), device.as_deref())?
        }
        Command::Networking { path, name, device } => {
            networking(&path, name.as_deref(), device.as_deref())?
        }
        Command::Leases { path, apple } => leases(&path, apple)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command).await {
        Err(e) if was_cancelled(&e) => {
            info!("boot command cancelled");
            Ok(ExitCode::from(CANCELLED_STATUS))
        }
        result => result.map(|()| ExitCode::SUCCESS),
    }
}
