use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, CommandFactory, Parser};

use ser2tcp_lib::io::serial::list_ports;
use ser2tcp_lib::BridgeSettings;

/// Bridge a serial device speaking the 0xAD 0xDE event protocol to a TCP client.
#[derive(Parser, Debug)]
#[command(name = "ser2tcp", version, about, disable_help_flag = true)]
struct Cli {
    /// Serial device name
    #[arg(short = 's', long = "serial")]
    serial: Option<String>,

    /// Serial baud rate in bps
    #[arg(short = 'b', long = "baud")]
    baud: Option<u32>,

    /// TCP listen port number
    #[arg(short = 'l', long = "listen")]
    listen: Option<u16>,

    /// Settings file (TOML)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Maximum event buffers per session
    #[arg(long = "pool-limit")]
    pool_limit: Option<usize>,

    /// Also write logs to a timestamped file in this directory
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,

    /// Hex-dump upstream traffic and report dropped noise bytes
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,

    /// List available serial ports and exit
    #[arg(long = "list-ports", action = ArgAction::SetTrue)]
    list_ports: bool,

    /// Show this help
    #[arg(short = 'h', long = "help", action = ArgAction::SetTrue)]
    help: bool,
}

impl Cli {
    /// Apply command-line overrides on top of file/default settings.
    fn apply(&self, settings: &mut BridgeSettings) {
        if let Some(port) = &self.serial {
            settings.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            settings.serial.baud_rate = baud;
        }
        if let Some(listen) = self.listen {
            settings.tcp.listen_port = listen;
        }
        if let Some(limit) = self.pool_limit {
            settings.pipeline.pool_limit = limit;
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.clone());
        }
        if self.verbose {
            settings.verbose = true;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.help {
        eprintln!("Usage: ser2tcp -s <serial device> -b <serial baud> -l <tcp port listen>\n");
        let _ = Cli::command().write_help(&mut std::io::stderr());
        eprintln!();
        return ExitCode::from(2);
    }

    if cli.list_ports {
        return match list_ports() {
            Ok(ports) => {
                for p in ports {
                    println!(
                        "{}\t{}\t{}",
                        p.port_name,
                        p.port_type,
                        p.product.unwrap_or_default()
                    );
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let mut settings = match BridgeSettings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut settings);

    match ser2tcp_lib::run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
