use serialport::{SerialPortInfo, SerialPortType};

use crate::device::RfExplorer;
use crate::rfe_terminal::{RfeTerminal, TerminalError};

/// USB ids of the CP210x bridge built into RF Explorer units.
const RFE_USB_IDS: [(u16, u16); 1] = [(0x10c4, 0xea60)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfeDevice {
    pub port: String,
    pub description: String,
    /// Whether the USB ids match the RF Explorer serial bridge.
    pub known_bridge: bool,
}

impl RfeDevice {
    fn from_port_info(info: &SerialPortInfo) -> Option<Self> {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => Some(Self {
                port: info.port_name.clone(),
                description: usb.product.clone().unwrap_or_else(|| "USB serial".to_string()),
                known_bridge: RFE_USB_IDS
                    .iter()
                    .any(|(vid, pid)| usb.vid == *vid && usb.pid == *pid),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Serial terminal error: {0}")]
    SerialTerminal(#[from] TerminalError),

    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("No RF Explorer found. Please connect the analyzer or specify the port manually")]
    DeviceNotFound,
}

pub struct RfeConnector;

impl RfeConnector {
    /// Connect to an RF Explorer, auto-detecting the port when none is given.
    pub fn connect(port: Option<&str>, baud_rate: u32) -> Result<RfExplorer, ConnectorError> {
        let port = match port {
            Some(port) => port.to_string(),
            None => Self::detect_port()?,
        };

        log::info!("Connecting to RF Explorer on {} at {} baud", port, baud_rate);
        let terminal = RfeTerminal::new(&port, baud_rate)?;
        Ok(RfExplorer::new(terminal))
    }

    /// All USB serial ports, RF Explorer bridges first.
    pub fn get_available_devices() -> Result<Vec<RfeDevice>, ConnectorError> {
        let ports = serialport::available_ports()?;
        Ok(Self::rank_devices(&ports))
    }

    fn rank_devices(ports: &[SerialPortInfo]) -> Vec<RfeDevice> {
        let mut devices: Vec<RfeDevice> = ports.iter().filter_map(RfeDevice::from_port_info).collect();
        devices.sort_by_key(|device| !device.known_bridge);
        devices
    }

    fn detect_port() -> Result<String, ConnectorError> {
        log::debug!("Searching for an RF Explorer serial port");

        Self::get_available_devices()?
            .into_iter()
            .next()
            .map(|device| device.port)
            .ok_or(ConnectorError::DeviceNotFound)
    }
}
