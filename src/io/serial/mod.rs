// src/io/serial/mod.rs
//
// Serial side of the bridge.
//
// Features:
// - Event framer for the 0xAD 0xDE downstream protocol
// - Port configuration, opening and enumeration via serialport

pub mod framer;
pub(crate) mod utils;

pub use framer::{encode_event, EventFramer, FeedStats, FramerState, EVENT_MARK0, EVENT_MARK1};
pub use utils::{device_label, list_ports, open_port, Parity, SerialPortInfo};
