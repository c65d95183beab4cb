//! Configuration for the OPC UA ↔ Modbus bridge.

use bridge_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::mapping::AddressMapper;
use crate::node::NodeId;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] bridge_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Modbus (register side) settings
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// OPC UA (node side) settings
    #[serde(default)]
    pub opcua: OpcUaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Connection type and address
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// First holding register of the bridged block (0-based)
    #[serde(default)]
    pub start_address: u16,

    /// Number of registers in the block; also the number of mapped nodes
    #[serde(default = "default_register_count")]
    pub register_count: u16,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            unit_id: default_unit_id(),
            start_address: 0,
            register_count: default_register_count(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_unit_id() -> u8 {
    1
}

fn default_register_count() -> u16 {
    4
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        #[serde(default = "default_modbus_host")]
        host: String,
        /// TCP port (default: 5020)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::Tcp {
            host: default_modbus_host(),
            port: default_modbus_port(),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ConnectionConfig::Rtu {
                port, baud_rate, ..
            } => write!(f, "rtu://{}@{}", port, baud_rate),
        }
    }
}

fn default_modbus_host() -> String {
    "localhost".to_string()
}

fn default_modbus_port() -> u16 {
    5020
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// OPC UA client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Server endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Node mapped to the first register of the block
    #[serde(default = "default_base_node")]
    pub base_node: NodeId,

    /// Client application name
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Subscription publishing interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub publishing_interval_ms: u64,

    /// Monitored item sampling interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub sampling_interval_ms: u64,

    /// Accept server certificates without verification
    #[serde(default = "default_trust_server_certs")]
    pub trust_server_certs: bool,

    /// Directory for the client PKI store
    #[serde(default)]
    pub pki_dir: Option<String>,

    /// Write initial values using each node's current data type
    #[serde(default = "default_coerce")]
    pub coerce_to_node_type: bool,
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            base_node: default_base_node(),
            application_name: default_application_name(),
            publishing_interval_ms: default_interval_ms(),
            sampling_interval_ms: default_interval_ms(),
            trust_server_certs: default_trust_server_certs(),
            pki_dir: None,
            coerce_to_node_type: default_coerce(),
        }
    }
}

fn default_endpoint() -> String {
    "opc.tcp://localhost:4840/freeopcua/server/".to_string()
}

fn default_base_node() -> NodeId {
    NodeId::new(2, 2003)
}

fn default_application_name() -> String {
    "opcua-modbus-bridge".to_string()
}

fn default_interval_ms() -> u64 {
    100
}

fn default_trust_server_certs() -> bool {
    true
}

fn default_coerce() -> bool {
    true
}

/// Command-line overrides applied on top of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub modbus_host: Option<String>,
    pub modbus_port: Option<u16>,
    pub opcua_endpoint: Option<String>,
    pub start_address: Option<u16>,
    pub register_count: Option<u16>,
    pub log_level: Option<String>,
}

/// Settings handed to the controller at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// First register of the bridged block.
    pub start_address: u16,
    /// Node ↔ offset mapping.
    pub mapper: AddressMapper,
    /// Subscription publishing interval.
    pub publishing_interval: Duration,
    /// Monitored item sampling interval.
    pub sampling_interval: Duration,
    /// Write initial values using each node's current data type.
    pub coerce_to_node_type: bool,
}

impl BridgeSettings {
    /// Settings with 100 ms intervals and type-preserving initial writes.
    pub fn new(start_address: u16, base_node: NodeId, count: u16) -> Self {
        Self {
            start_address,
            mapper: AddressMapper::new(base_node, count),
            publishing_interval: Duration::from_millis(default_interval_ms()),
            sampling_interval: Duration::from_millis(default_interval_ms()),
            coerce_to_node_type: true,
        }
    }

    /// Absolute register address of a mapped offset.
    pub fn register_address(&self, offset: u16) -> Option<u16> {
        self.start_address.checked_add(offset)
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: GatewayConfig = bridge_common::load_config(path)?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if overrides.modbus_host.is_some() || overrides.modbus_port.is_some() {
            let (host, port) = match &self.modbus.connection {
                ConnectionConfig::Tcp { host, port } => (host.clone(), *port),
                ConnectionConfig::Rtu { .. } => (default_modbus_host(), default_modbus_port()),
            };
            self.modbus.connection = ConnectionConfig::Tcp {
                host: overrides.modbus_host.clone().unwrap_or(host),
                port: overrides.modbus_port.unwrap_or(port),
            };
        }
        if let Some(endpoint) = &overrides.opcua_endpoint {
            self.opcua.endpoint = endpoint.clone();
        }
        if let Some(start_address) = overrides.start_address {
            self.modbus.start_address = start_address;
        }
        if let Some(register_count) = overrides.register_count {
            self.modbus.register_count = register_count;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let modbus = &self.modbus;

        if modbus.unit_id == 0 {
            return Err(ConfigError::Validation(
                "modbus.unit_id must be 1-247".to_string(),
            ));
        }

        if modbus.register_count == 0 {
            return Err(ConfigError::Validation(
                "modbus.register_count must be at least 1".to_string(),
            ));
        }

        if u32::from(modbus.start_address) + u32::from(modbus.register_count) > 65536 {
            return Err(ConfigError::Validation(format!(
                "register block {}+{} exceeds the 16-bit address space",
                modbus.start_address, modbus.register_count
            )));
        }

        if modbus.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "modbus.timeout_ms must be greater than 0".to_string(),
            ));
        }

        match &modbus.connection {
            ConnectionConfig::Tcp { host, .. } => {
                if host.is_empty() {
                    return Err(ConfigError::Validation(
                        "modbus host cannot be empty".to_string(),
                    ));
                }
            }
            ConnectionConfig::Rtu {
                port,
                parity,
                data_bits,
                stop_bits,
                ..
            } => {
                if port.is_empty() {
                    return Err(ConfigError::Validation(
                        "modbus serial port cannot be empty".to_string(),
                    ));
                }
                if !(5..=8).contains(data_bits) {
                    return Err(ConfigError::Validation(format!(
                        "invalid data_bits {} (use 5, 6, 7 or 8)",
                        data_bits
                    )));
                }
                if !matches!(*stop_bits, 1 | 2) {
                    return Err(ConfigError::Validation(format!(
                        "invalid stop_bits {} (use 1 or 2)",
                        stop_bits
                    )));
                }
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(ConfigError::Validation(format!(
                            "invalid parity '{}' (use none, even, or odd)",
                            parity
                        )));
                    }
                }
            }
        }

        let opcua = &self.opcua;

        if !opcua.endpoint.starts_with("opc.tcp://") {
            return Err(ConfigError::Validation(format!(
                "opcua.endpoint '{}' must start with opc.tcp://",
                opcua.endpoint
            )));
        }

        if opcua.publishing_interval_ms == 0 || opcua.sampling_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "opcua intervals must be greater than 0".to_string(),
            ));
        }

        if opcua
            .base_node
            .identifier
            .checked_add(u32::from(modbus.register_count) - 1)
            .is_none()
        {
            return Err(ConfigError::Validation(format!(
                "mapped range starting at {} overflows the identifier space",
                opcua.base_node
            )));
        }

        Ok(())
    }

    /// Build the controller settings.
    pub fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            start_address: self.modbus.start_address,
            mapper: AddressMapper::new(self.opcua.base_node, self.modbus.register_count),
            publishing_interval: Duration::from_millis(self.opcua.publishing_interval_ms),
            sampling_interval: Duration::from_millis(self.opcua.sampling_interval_ms),
            coerce_to_node_type: self.opcua.coerce_to_node_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config: GatewayConfig = json5::from_str("{}").unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.modbus.connection,
            ConnectionConfig::Tcp {
                host: "localhost".to_string(),
                port: 5020
            }
        );
        assert_eq!(config.modbus.start_address, 0);
        assert_eq!(config.modbus.register_count, 4);
        assert_eq!(
            config.opcua.endpoint,
            "opc.tcp://localhost:4840/freeopcua/server/"
        );
        assert_eq!(config.opcua.base_node, NodeId::new(2, 2003));
        assert_eq!(config.opcua.publishing_interval_ms, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_tcp_config() {
        let json = r#"{
            modbus: {
                connection: { type: "tcp", host: "192.168.1.10", port: 502 },
                unit_id: 3,
                start_address: 100,
                register_count: 8,
            },
            opcua: {
                endpoint: "opc.tcp://plc:4840",
                base_node: "ns=4;i=5000",
                publishing_interval_ms: 250,
            }
        }"#;

        let config: GatewayConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        let settings = config.settings();
        assert_eq!(settings.start_address, 100);
        assert_eq!(settings.mapper.count(), 8);
        assert_eq!(settings.mapper.base(), NodeId::new(4, 5000));
        assert_eq!(settings.publishing_interval, Duration::from_millis(250));
        assert_eq!(settings.sampling_interval, Duration::from_millis(100));
        assert_eq!(settings.register_address(7), Some(107));
    }

    #[test]
    fn test_parse_rtu_config() {
        let json = r#"{
            modbus: {
                connection: {
                    type: "rtu",
                    port: "/dev/ttyUSB0",
                    baud_rate: 19200,
                    parity: "even"
                },
                unit_id: 5,
            }
        }"#;

        let config: GatewayConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.modbus.unit_id, 5);
        if let ConnectionConfig::Rtu {
            port,
            baud_rate,
            parity,
            stop_bits,
            ..
        } = &config.modbus.connection
        {
            assert_eq!(port, "/dev/ttyUSB0");
            assert_eq!(*baud_rate, 19200);
            assert_eq!(parity, "even");
            assert_eq!(*stop_bits, 1);
        } else {
            panic!("Expected RTU connection");
        }
    }

    #[test]
    fn test_overrides() {
        let mut config = GatewayConfig::default();
        config.apply_overrides(&Overrides {
            modbus_host: Some("10.0.0.5".to_string()),
            opcua_endpoint: Some("opc.tcp://10.0.0.6:4840".to_string()),
            start_address: Some(40),
            register_count: Some(2),
            log_level: Some("debug".to_string()),
            ..Default::default()
        });

        assert_eq!(
            config.modbus.connection,
            ConnectionConfig::Tcp {
                host: "10.0.0.5".to_string(),
                port: 5020
            }
        );
        assert_eq!(config.opcua.endpoint, "opc.tcp://10.0.0.6:4840");
        assert_eq!(config.modbus.start_address, 40);
        assert_eq!(config.modbus.register_count, 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validate_zero_registers() {
        let mut config = GatewayConfig::default();
        config.modbus.register_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_block_past_address_space() {
        let mut config = GatewayConfig::default();
        config.modbus.start_address = 65534;
        config.modbus.register_count = 2;
        assert!(config.validate().is_ok());

        config.modbus.register_count = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_endpoint_scheme() {
        let mut config = GatewayConfig::default();
        config.opcua.endpoint = "http://localhost:4840".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_parity() {
        let json = r#"{
            modbus: { connection: { type: "rtu", port: "/dev/ttyS0", parity: "mark" } }
        }"#;

        let config: GatewayConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_serial_framing() {
        let json = r#"{
            modbus: { connection: { type: "rtu", port: "/dev/ttyS0", data_bits: 9 } }
        }"#;
        let config: GatewayConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{
            modbus: { connection: { type: "rtu", port: "/dev/ttyS0", stop_bits: 3 } }
        }"#;
        let config: GatewayConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{
            modbus: { connection: { type: "rtu", port: "/dev/ttyS0", data_bits: 7, stop_bits: 2 } }
        }"#;
        let config: GatewayConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_range_ending_at_last_identifier() {
        let mut config = GatewayConfig::default();
        config.opcua.base_node = NodeId::new(2, u32::MAX - 3);
        config.modbus.register_count = 4;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.settings().mapper.to_node_id(3),
            Some(NodeId::new(2, u32::MAX))
        );

        config.modbus.register_count = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_base_node_is_rejected_at_parse() {
        let json = r#"{ opcua: { base_node: "ns=2;s=Pump" } }"#;
        assert!(json5::from_str::<GatewayConfig>(json).is_err());
    }
}
