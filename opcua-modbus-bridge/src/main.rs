//! OPC UA ↔ Modbus bridge.
//!
//! Pushes a block of Modbus holding registers to OPC UA variables at startup,
//! then writes OPC UA data changes back to the registers until stopped.

use anyhow::{Context, Result};
use bridge_common::BridgeArgs;
use clap::Parser;
use opcua_modbus_bridge::config::{GatewayConfig, Overrides};
use opcua_modbus_bridge::controller::BridgeController;
use opcua_modbus_bridge::opcua_client::OpcUaNodes;
use opcua_modbus_bridge::register::ModbusRegisters;
use tracing::info;

/// Bridge between Modbus holding registers and OPC UA variables.
#[derive(Parser, Debug)]
#[command(name = "opcua-modbus-bridge")]
#[command(about = "Keeps Modbus registers and OPC UA variables in sync")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: BridgeArgs,

    /// Modbus server host
    #[arg(long)]
    modbus_server_host: Option<String>,

    /// Modbus server port
    #[arg(long)]
    modbus_server_port: Option<u16>,

    /// OPC UA server URL
    #[arg(long)]
    opc_ua_server_url: Option<String>,

    /// Starting address for reading Modbus registers
    #[arg(long)]
    start_address: Option<u16>,

    /// Number of Modbus registers to read (and OPC UA nodes to map)
    #[arg(long)]
    register_count: Option<u16>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            modbus_host: self.modbus_server_host.clone(),
            modbus_port: self.modbus_server_port,
            opcua_endpoint: self.opc_ua_server_url.clone(),
            start_address: self.start_address,
            register_count: self.register_count,
            log_level: self.common.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.common.config {
        Some(path) => GatewayConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => GatewayConfig::default(),
    };
    config.apply_overrides(&args.overrides());
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    bridge_common::init_tracing(&config.logging).context("Failed to init tracing")?;

    info!("Starting opcua-modbus-bridge");
    if let Some(path) = &args.common.config {
        info!("Loaded configuration from {:?}", path);
    }
    info!(
        modbus = %config.modbus.connection,
        opcua = %config.opcua.endpoint,
        start_address = config.modbus.start_address,
        register_count = config.modbus.register_count,
        base_node = %config.opcua.base_node,
        "Bridge configuration"
    );

    let registers = ModbusRegisters::new(&config.modbus);
    let nodes = OpcUaNodes::new(config.opcua.clone());
    let controller = BridgeController::new(config.settings(), registers, nodes);

    let shutdown = bridge_common::shutdown_channel();
    let report = controller.run(shutdown).await.context("Bridge failed")?;

    info!(
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "Final statistics"
    );
    info!("Bridge stopped");

    Ok(())
}
