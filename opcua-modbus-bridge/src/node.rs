//! Node-side (publish/subscribe) transport abstraction.
//!
//! The controller only talks to OPC UA through [`NodeTransport`]. Change
//! notifications are pushed into a [`DataChangeSender`] handed over when the
//! subscription is created, so the controller consumes them as a single FIFO
//! queue.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BridgeError;

/// Numeric node identifier: `(namespace index, integer identifier)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: u32,
}

impl NodeId {
    pub const fn new(namespace: u16, identifier: u32) -> Self {
        Self {
            namespace,
            identifier,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.namespace, self.identifier)
    }
}

/// Error returned when a node id string is not of the form `ns=<n>;i=<id>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id '{0}' (expected ns=<namespace>;i=<identifier>)")]
pub struct ParseNodeIdError(String);

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNodeIdError(s.to_string());
        let trimmed = s.trim();

        // A bare "i=<id>" refers to namespace 0.
        let (namespace, identifier) = match trimmed.split_once(';') {
            Some((ns, id)) => (ns.trim().strip_prefix("ns=").ok_or_else(err)?, id.trim()),
            None => ("0", trimmed),
        };

        let identifier = identifier.strip_prefix("i=").ok_or_else(err)?;

        Ok(Self {
            namespace: namespace.parse().map_err(|_| err())?,
            identifier: identifier.parse().map_err(|_| err())?,
        })
    }
}

impl TryFrom<String> for NodeId {
    type Error = ParseNodeIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.to_string()
    }
}

/// Scalar value carried by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl NodeValue {
    /// Integer view of the value, truncating floating point toward zero.
    ///
    /// Returns `None` for empty, textual and non-finite values.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            NodeValue::Boolean(v) => Some(i128::from(*v)),
            NodeValue::SByte(v) => Some(i128::from(*v)),
            NodeValue::Byte(v) => Some(i128::from(*v)),
            NodeValue::Int16(v) => Some(i128::from(*v)),
            NodeValue::UInt16(v) => Some(i128::from(*v)),
            NodeValue::Int32(v) => Some(i128::from(*v)),
            NodeValue::UInt32(v) => Some(i128::from(*v)),
            NodeValue::Int64(v) => Some(i128::from(*v)),
            NodeValue::UInt64(v) => Some(i128::from(*v)),
            NodeValue::Float(v) if v.is_finite() => Some(v.trunc() as i128),
            NodeValue::Double(v) if v.is_finite() => Some(v.trunc() as i128),
            _ => None,
        }
    }

    /// Convert to a register value, or `None` when it does not fit 16 bits.
    pub fn to_register_value(&self) -> Option<u16> {
        self.as_integer().and_then(|v| u16::try_from(v).ok())
    }

    /// Express a register value using the same data type as `self`.
    ///
    /// Falls back to `UInt16` when the type cannot hold the value, or has no
    /// numeric meaning (empty, string).
    pub fn register_value_like(&self, value: u16) -> NodeValue {
        match self {
            NodeValue::Boolean(_) if value <= 1 => NodeValue::Boolean(value == 1),
            NodeValue::SByte(_) => i8::try_from(value)
                .map(NodeValue::SByte)
                .unwrap_or(NodeValue::UInt16(value)),
            NodeValue::Byte(_) => u8::try_from(value)
                .map(NodeValue::Byte)
                .unwrap_or(NodeValue::UInt16(value)),
            NodeValue::Int16(_) => i16::try_from(value)
                .map(NodeValue::Int16)
                .unwrap_or(NodeValue::UInt16(value)),
            NodeValue::Int32(_) => NodeValue::Int32(i32::from(value)),
            NodeValue::UInt32(_) => NodeValue::UInt32(u32::from(value)),
            NodeValue::Int64(_) => NodeValue::Int64(i64::from(value)),
            NodeValue::UInt64(_) => NodeValue::UInt64(u64::from(value)),
            NodeValue::Float(_) => NodeValue::Float(f32::from(value)),
            NodeValue::Double(_) => NodeValue::Double(f64::from(value)),
            _ => NodeValue::UInt16(value),
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Empty => write!(f, "<empty>"),
            NodeValue::Boolean(v) => write!(f, "{}", v),
            NodeValue::SByte(v) => write!(f, "{}", v),
            NodeValue::Byte(v) => write!(f, "{}", v),
            NodeValue::Int16(v) => write!(f, "{}", v),
            NodeValue::UInt16(v) => write!(f, "{}", v),
            NodeValue::Int32(v) => write!(f, "{}", v),
            NodeValue::UInt32(v) => write!(f, "{}", v),
            NodeValue::Int64(v) => write!(f, "{}", v),
            NodeValue::UInt64(v) => write!(f, "{}", v),
            NodeValue::Float(v) => write!(f, "{}", v),
            NodeValue::Double(v) => write!(f, "{}", v),
            NodeValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

/// A single change notification for a monitored node.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    pub node: NodeId,
    pub value: NodeValue,
}

impl DataChange {
    pub fn new(node: NodeId, value: NodeValue) -> Self {
        Self { node, value }
    }
}

/// Producer side of the notification queue.
pub type DataChangeSender = mpsc::UnboundedSender<DataChange>;

/// Consumer side of the notification queue.
pub type DataChangeReceiver = mpsc::UnboundedReceiver<DataChange>;

/// Opaque handle to a transport-side subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u32);

/// Opaque handle to one node's registration within a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorHandle(pub u32);

/// Publish/subscribe transport used by the bridge.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Establish the session with the server.
    async fn connect(&mut self) -> Result<(), BridgeError>;

    /// Read the current value of a node.
    async fn read_value(&self, node: &NodeId) -> Result<NodeValue, BridgeError>;

    /// Write a node value and wait for the acknowledgement.
    async fn write_value(&self, node: &NodeId, value: NodeValue) -> Result<(), BridgeError>;

    /// Create a subscription; every value change of its monitors is sent to `sink`.
    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        sink: DataChangeSender,
    ) -> Result<SubscriptionHandle, BridgeError>;

    /// Register a node for change notification within `subscription`.
    async fn monitor(
        &self,
        subscription: SubscriptionHandle,
        node: &NodeId,
        sampling_interval: Duration,
    ) -> Result<MonitorHandle, BridgeError>;

    /// Cancel a monitor. Unknown or already-cancelled handles are not an error.
    async fn cancel(
        &self,
        subscription: SubscriptionHandle,
        monitor: MonitorHandle,
    ) -> Result<(), BridgeError>;

    /// Delete a subscription. Unknown or already-deleted handles are not an error.
    async fn delete_subscription(&self, subscription: SubscriptionHandle)
    -> Result<(), BridgeError>;

    /// Close the session.
    async fn disconnect(&mut self) -> Result<(), BridgeError>;

    /// Human-readable endpoint, used in logs.
    fn endpoint(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_parse() {
        let node = NodeId::new(2, 2003);
        assert_eq!(node.to_string(), "ns=2;i=2003");
        assert_eq!("ns=2;i=2003".parse::<NodeId>().unwrap(), node);
        assert_eq!(" ns=2 ; i=2003 ".parse::<NodeId>().unwrap(), node);
        assert_eq!("i=85".parse::<NodeId>().unwrap(), NodeId::new(0, 85));
    }

    #[test]
    fn test_node_id_parse_errors() {
        assert!("ns=2;s=Temperature".parse::<NodeId>().is_err());
        assert!("2003".parse::<NodeId>().is_err());
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=70000;i=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_serde_as_string() {
        let node: NodeId = json5::from_str(r#""ns=3;i=17""#).unwrap();
        assert_eq!(node, NodeId::new(3, 17));
        assert_eq!(serde_json::to_string(&node).unwrap(), r#""ns=3;i=17""#);
    }

    #[test]
    fn test_register_value_truncates() {
        assert_eq!(NodeValue::Double(77.9).to_register_value(), Some(77));
        assert_eq!(NodeValue::Float(-0.5).to_register_value(), Some(0));
        assert_eq!(NodeValue::Int64(65535).to_register_value(), Some(65535));
        assert_eq!(NodeValue::Boolean(true).to_register_value(), Some(1));
    }

    #[test]
    fn test_register_value_rejects_out_of_range() {
        assert_eq!(NodeValue::Int32(-1).to_register_value(), None);
        assert_eq!(NodeValue::UInt32(65536).to_register_value(), None);
        assert_eq!(NodeValue::Double(f64::NAN).to_register_value(), None);
        assert_eq!(NodeValue::String("12".into()).to_register_value(), None);
        assert_eq!(NodeValue::Empty.to_register_value(), None);
    }

    #[test]
    fn test_register_value_like_keeps_type() {
        assert_eq!(NodeValue::Int16(0).register_value_like(10), NodeValue::Int16(10));
        assert_eq!(NodeValue::Double(1.5).register_value_like(30), NodeValue::Double(30.0));
        assert_eq!(NodeValue::Int64(0).register_value_like(40), NodeValue::Int64(40));
        assert_eq!(NodeValue::Boolean(false).register_value_like(1), NodeValue::Boolean(true));
    }

    #[test]
    fn test_register_value_like_falls_back_to_u16() {
        assert_eq!(NodeValue::Int16(0).register_value_like(40000), NodeValue::UInt16(40000));
        assert_eq!(NodeValue::Byte(0).register_value_like(300), NodeValue::UInt16(300));
        assert_eq!(NodeValue::Boolean(false).register_value_like(2), NodeValue::UInt16(2));
        assert_eq!(NodeValue::Empty.register_value_like(5), NodeValue::UInt16(5));
        assert_eq!(NodeValue::String("x".into()).register_value_like(5), NodeValue::UInt16(5));
    }
}
