//! Serial port transport implementation

use crate::byte_stream::{ByteStream, ByteStreamOptions};
use dcc_core::{ConnectionConfig, DccError, DccResult};
use std::time::Duration;
use tokio_serial::SerialStream;

/// Default baud rate for USB command stations
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial port transport layer settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
    /// Timeout applied by the OS driver to a single blocking call
    pub timeout: Duration,
    /// Keep a debug trace of this many entries
    pub trace_capacity: Option<usize>,
}

impl SerialSettings {
    /// Create new serial settings with 8N1 framing
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
            flow_control: tokio_serial::FlowControl::None,
            timeout: Duration::from_secs(1),
            trace_capacity: None,
        }
    }

    /// Build settings from a parsed connection string
    ///
    /// Uses `port` (required), `baud` and `debug`.
    pub fn from_connection_config(
        config: &ConnectionConfig,
        trace_capacity: usize,
    ) -> DccResult<Self> {
        let mut settings = Self::new(
            config.port()?,
            config.get_u32("baud", DEFAULT_BAUD_RATE)?,
        );
        if config.flag("debug") {
            settings.trace_capacity = Some(trace_capacity);
        }
        Ok(settings)
    }
}

/// Opens serial ports as [`ByteStream`]s
pub struct SerialTransport;

impl SerialTransport {
    /// Open the port described by `settings`
    ///
    /// # Errors
    /// `DccError::Connection` if the port cannot be opened.
    pub fn open(settings: &SerialSettings) -> DccResult<ByteStream> {
        let builder = tokio_serial::new(&settings.port_name, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(settings.flow_control)
            .timeout(settings.timeout);

        let stream = SerialStream::open(&builder).map_err(|e| {
            DccError::from(std::io::Error::other(format!(
                "Failed to open serial port {}: {}",
                settings.port_name, e
            )))
        })?;

        Ok(ByteStream::new(
            stream,
            ByteStreamOptions {
                label: settings.port_name.clone(),
                trace_capacity: settings.trace_capacity,
            },
        ))
    }
}
