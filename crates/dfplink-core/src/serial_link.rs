use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use dfplink_decode::{hex_string, Command, DecodeError, FrameReader};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serialport::SerialPortInfo;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::TransportError;

/// Any byte stream the link thread can own.
pub trait Port: Read + Write + Send {}

impl<T: Read + Write + Send> Port for T {}

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, serial_number, manufacturer, product) = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.serial_number.clone(),
                usb.manufacturer.clone(),
                usb.product.clone(),
            ),
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None, None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            serial_number,
            manufacturer,
            product,
        }
    }
}

/// UART settings. The module only speaks 9600 8N1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            read_timeout_ms: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LinkEvent {
    Frame(Command),
    Garbled(DecodeError),
    Error(String),
    Closed,
}

enum Request {
    Write {
        frame: Vec<u8>,
        done: Sender<Result<(), String>>,
    },
    Close,
}

const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns a port on a background thread: frames in, frames out.
pub struct SerialLink {
    tx_req: Sender<Request>,
    rx_evt: Receiver<LinkEvent>,
}

impl SerialLink {
    pub fn list_ports() -> Vec<PortInfo> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(PortInfo::from)
            .collect()
    }

    pub fn open(cfg: &LinkConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&cfg.port_name, cfg.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(cfg.read_timeout_ms))
            .open()
            .map_err(|e| TransportError::Open {
                port: cfg.port_name.clone(),
                reason: e.to_string(),
            })?;
        debug!("opened {} at {} baud", cfg.port_name, cfg.baud_rate);
        Ok(Self::with_port(Box::new(port)))
    }

    pub fn with_port(port: Box<dyn Port>) -> Self {
        let (tx_req, rx_req) = unbounded::<Request>();
        let (tx_evt, rx_evt) = unbounded::<LinkEvent>();

        std::thread::spawn(move || io_loop(port, rx_req, tx_evt));

        Self { tx_req, rx_evt }
    }

    /// Write one frame and wait until the port has taken it.
    pub fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let (done, wait) = bounded(1);
        self.tx_req
            .send(Request::Write {
                frame: frame.to_vec(),
                done,
            })
            .map_err(|_| TransportError::Closed)?;
        match wait.recv_timeout(WRITE_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(TransportError::Write(reason)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    pub fn events(&self) -> &Receiver<LinkEvent> {
        &self.rx_evt
    }

    pub fn close(&self) {
        let _ = self.tx_req.send(Request::Close);
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn io_loop(mut port: Box<dyn Port>, rx_req: Receiver<Request>, tx_evt: Sender<LinkEvent>) {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 256];
    loop {
        match port.read(&mut buf) {
            Ok(n) if n > 0 => {
                trace!("rx {}", hex_string(&buf[..n]));
                reader.push(&buf[..n]);
                while let Some(decoded) = reader.next_frame() {
                    let event = match decoded {
                        Ok(command) => LinkEvent::Frame(command),
                        Err(e) => LinkEvent::Garbled(e),
                    };
                    let _ = tx_evt.send(event);
                }
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                let _ = tx_evt.send(LinkEvent::Error(e.to_string()));
                let _ = tx_evt.send(LinkEvent::Closed);
                return;
            }
        }

        loop {
            match rx_req.try_recv() {
                Ok(Request::Write { frame, done }) => {
                    let result = port
                        .write_all(&frame)
                        .and_then(|_| port.flush())
                        .map_err(|e| e.to_string());
                    if result.is_ok() {
                        trace!("tx {}", hex_string(&frame));
                    }
                    let _ = done.send(result);
                }
                Ok(Request::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = tx_evt.send(LinkEvent::Closed);
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
