// src/io/serial/utils.rs
//
// serialport helpers: settings conversion, opening the device, enumerating ports.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, SerialPort, StopBits};

use crate::io::IoError;
use crate::settings::SerialSettings;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

impl Parity {
    /// Letter used in the usual `8-N-1` notation.
    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

/// A serial port discovered on this machine.
#[derive(Clone, Debug)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub product: Option<String>,
}

// ============================================================================
// Conversion Functions
// ============================================================================

pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Anything other than 5, 6 or 7 maps to eight data bits.
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

/// Label used in logs and errors for a serial device.
pub fn device_label(port: &str) -> String {
    format!("serial({})", port)
}

// ============================================================================
// Port Access
// ============================================================================

/// Open the serial device described by `settings`.
///
/// The read timeout keeps blocking reads short so the downstream loop can
/// notice a stop request; timeouts are not treated as errors by the caller.
pub fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, IoError> {
    let port = serialport::new(&settings.port, settings.baud_rate)
        .data_bits(to_serialport_data_bits(settings.data_bits))
        .stop_bits(to_serialport_stop_bits(settings.stop_bits))
        .parity(to_serialport_parity(settings.parity))
        .timeout(Duration::from_millis(settings.read_timeout_ms))
        .open()
        .map_err(|e| IoError::connection(&device_label(&settings.port), e.to_string()))?;

    tlog!(
        "[bridge] Opened {} at {} baud ({}-{}-{})",
        settings.port,
        settings.baud_rate,
        settings.data_bits,
        settings.parity.letter(),
        settings.stop_bits
    );

    Ok(port)
}

/// Enumerate serial ports available on this machine.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::connection("serial", format!("Failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        // On macOS only the /dev/cu.* (calling unit) devices are useful here
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, product) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => ("USB".to_string(), info.product),
                serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None),
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None),
                serialport::SerialPortType::Unknown => ("Unknown".to_string(), None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                product,
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
