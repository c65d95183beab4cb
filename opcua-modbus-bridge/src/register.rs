//! Register-side (Modbus) transport.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, ModbusConfig};
use crate::error::BridgeError;

/// Polling transport for 16-bit holding registers.
///
/// Every call is a single round trip. A failed call leaves the transport usable.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Open the connection to the device.
    async fn connect(&mut self) -> Result<(), BridgeError>;

    /// Read `count` registers starting at `address`.
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BridgeError>;

    /// Write a single register.
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BridgeError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), BridgeError>;

    /// Human-readable target, used in logs.
    fn target(&self) -> String;
}

/// Modbus TCP/RTU implementation backed by `tokio-modbus`.
pub struct ModbusRegisters {
    connection: ConnectionConfig,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusRegisters {
    /// Create an unconnected transport.
    pub fn new(config: &ModbusConfig) -> Self {
        Self {
            connection: config.connection.clone(),
            unit_id: config.unit_id,
            timeout: Duration::from_millis(config.timeout_ms),
            ctx: None,
        }
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, String> {
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| format!("Invalid address: {}", e))?;
        addrs
            .next()
            .ok_or_else(|| format!("No address found for {}", host))
    }

    async fn open(
        connection: ConnectionConfig,
        unit_id: u8,
        timeout: Duration,
    ) -> Result<Context, String> {
        let slave = Slave(unit_id);

        match &connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr = Self::resolve(host, *port).await?;

                tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| "Connection timeout".to_string())?
                    .map_err(|e| e.to_string())
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits);

                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| format!("Serial open failed: {}", e))?;

                Ok(rtu::attach_slave(serial, slave))
            }
        }
    }

    fn context(&mut self) -> Result<&mut Context, String> {
        self.ctx.as_mut().ok_or_else(|| "Not connected".to_string())
    }
}

#[async_trait]
impl RegisterTransport for ModbusRegisters {
    async fn connect(&mut self) -> Result<(), BridgeError> {
        info!(target_device = %self.connection, unit_id = self.unit_id, "Connecting to Modbus device");

        let ctx = Self::open(self.connection.clone(), self.unit_id, self.timeout)
            .await
            .map_err(|e| BridgeError::connection(self.connection.to_string(), e))?;
        self.ctx = Some(ctx);

        info!(target_device = %self.connection, "Connected to Modbus device");
        Ok(())
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BridgeError> {
        let timeout = self.timeout;
        let result = async {
            let ctx = self.context()?;
            tokio::time::timeout(timeout, ctx.read_holding_registers(address, count))
                .await
                .map_err(|_| "Request timeout".to_string())?
                .map_err(|e| e.to_string())?
                .map_err(|e| format!("Exception: {:?}", e))
        }
        .await;

        match result {
            Ok(values) => {
                debug!(address, count, ?values, "Read holding registers");
                Ok(values)
            }
            Err(message) => {
                warn!(address, count, error = %message, "Failed to read holding registers");
                Err(BridgeError::RegisterRead {
                    address,
                    count,
                    message,
                })
            }
        }
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BridgeError> {
        let timeout = self.timeout;
        let result = async {
            let ctx = self.context()?;
            tokio::time::timeout(timeout, ctx.write_single_register(address, value))
                .await
                .map_err(|_| "Request timeout".to_string())?
                .map_err(|e| e.to_string())?
                .map_err(|e| format!("Exception: {:?}", e))
        }
        .await;

        match result {
            Ok(()) => {
                info!(address, value, "Wrote holding register");
                Ok(())
            }
            Err(message) => {
                warn!(address, value, error = %message, "Failed to write holding register");
                Err(BridgeError::RegisterWrite {
                    address,
                    value,
                    message,
                })
            }
        }
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        let Some(mut ctx) = self.ctx.take() else {
            debug!(target_device = %self.connection, "Modbus transport already closed");
            return Ok(());
        };

        ctx.disconnect()
            .await
            .map_err(|e| BridgeError::connection(self.connection.to_string(), e))?;

        info!(target_device = %self.connection, "Closed Modbus connection");
        Ok(())
    }

    fn target(&self) -> String {
        self.connection.to_string()
    }
}
