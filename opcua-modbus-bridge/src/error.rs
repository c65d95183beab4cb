//! Error types for the bridge.

use thiserror::Error;

use crate::node::NodeId;

/// Errors raised by the transports and the controller.
///
/// Only [`BridgeError::Connection`] ever escapes [`crate::controller::BridgeController::run`];
/// every other variant is logged and handled where it occurs.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A transport could not be connected.
    #[error("Connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    /// Reading a block of registers failed.
    #[error("Reading {count} register(s) at {address} failed: {message}")]
    RegisterRead {
        address: u16,
        count: u16,
        message: String,
    },

    /// Writing a single register failed.
    #[error("Writing {value} to register {address} failed: {message}")]
    RegisterWrite {
        address: u16,
        value: u16,
        message: String,
    },

    /// Reading a node value failed.
    #[error("Reading node {node} failed: {message}")]
    NodeRead { node: NodeId, message: String },

    /// Writing a node value failed.
    #[error("Writing node {node} failed: {message}")]
    NodeWrite { node: NodeId, message: String },

    /// A node could not be registered for change notification.
    #[error("Monitoring node {node} failed: {message}")]
    MonitorCreation { node: NodeId, message: String },

    /// Subscription management failed.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// A node value has no 16-bit register representation.
    #[error("Value {value} of node {node} does not fit a 16-bit register")]
    ValueConversion { node: NodeId, value: String },
}

impl BridgeError {
    /// Create a connection error.
    pub fn connection(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a subscription error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription(message.into())
    }
}
