//! Bridge between Modbus holding registers and OPC UA variables.
//!
//! On startup the register block is read once and pushed to the mapped OPC UA
//! nodes. Afterwards every data change on those nodes is written back to the
//! corresponding register until the bridge is stopped.
//!
//! # Mapping
//!
//! ```text
//! node ns=<n>;i=<base + k>  <->  holding register <start_address + k>,  0 <= k < register_count
//! ```
//!
//! The transports sit behind [`register::RegisterTransport`] and
//! [`node::NodeTransport`]; [`controller::BridgeController`] only talks to
//! those traits.

pub mod config;
pub mod controller;
pub mod error;
pub mod mapping;
pub mod node;
pub mod opcua_client;
pub mod register;

pub use config::{BridgeSettings, GatewayConfig};
pub use controller::{BridgeController, BridgeReport, BridgeState};
pub use error::BridgeError;
pub use mapping::{AddressMapper, OutOfRange};
pub use node::{DataChange, NodeId, NodeTransport, NodeValue};
pub use register::RegisterTransport;
