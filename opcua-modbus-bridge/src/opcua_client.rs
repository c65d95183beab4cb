//! OPC UA node transport using the `opcua` crate.
//!
//! The `opcua` client API is synchronous, so every session call runs on the
//! blocking pool. The session's publish loop runs on its own thread
//! (`Session::run_async`) and forwards data changes into the bridge's
//! notification queue from the subscription callback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;
use tokio::sync::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::config::OpcUaConfig;
use crate::error::BridgeError;
use crate::node::{
    DataChange, DataChangeSender, MonitorHandle, NodeId, NodeTransport, NodeValue,
    SubscriptionHandle,
};

type SharedSession = Arc<OpcUaRwLock<Session>>;

/// OPC UA client session implementing [`NodeTransport`].
///
/// Subscription and monitor handles are the server-assigned ids. The live
/// ones are tracked locally so that repeated teardown calls are no-ops.
pub struct OpcUaNodes {
    config: OpcUaConfig,
    session: Option<SharedSession>,
    session_stop: Option<oneshot::Sender<SessionCommand>>,
    subscriptions: RwLock<HashMap<u32, HashSet<u32>>>,
}

impl OpcUaNodes {
    /// Create an unconnected transport.
    pub fn new(config: OpcUaConfig) -> Self {
        Self {
            config,
            session: None,
            session_stop: None,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Build a client, pick the unsecured endpoint and activate an anonymous session.
    fn open_session(config: &OpcUaConfig) -> Result<SharedSession, String> {
        let mut builder = ClientBuilder::new()
            .application_name(config.application_name.as_str())
            .application_uri(format!("urn:{}", config.application_name))
            .trust_server_certs(config.trust_server_certs)
            .create_sample_keypair(true)
            .session_retry_limit(0);

        if let Some(ref pki_dir) = config.pki_dir {
            builder = builder.pki_dir(pki_dir.as_str());
        }

        let mut client = builder
            .client()
            .ok_or_else(|| "Failed to build OPC UA client".to_string())?;

        let endpoints = client
            .get_server_endpoints_from_url(config.endpoint.as_str())
            .map_err(|e| format!("Endpoint discovery failed: {}", e))?;

        let endpoint = endpoints
            .into_iter()
            .find(|e| {
                e.security_policy_uri.as_ref() == SecurityPolicy::None.to_uri()
                    && e.security_mode == MessageSecurityMode::None
            })
            .ok_or_else(|| "Server offers no unsecured endpoint".to_string())?;

        debug!(
            security_policy = %endpoint.security_policy_uri,
            security_mode = ?endpoint.security_mode,
            "Found matching endpoint"
        );

        client
            .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
            .map_err(|e| format!("Session activation failed: {}", e))
    }

    /// Run a synchronous session call on the blocking pool.
    async fn call<T, F>(&self, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, StatusCode> + Send + 'static,
    {
        let session = self
            .session
            .clone()
            .ok_or_else(|| "Not connected".to_string())?;

        tokio::task::spawn_blocking(move || {
            let session = session.read();
            op(&session)
        })
        .await
        .map_err(|e| format!("Session task failed: {}", e))?
        .map_err(|status| status.to_string())
    }

    fn to_opcua_node_id(node: &NodeId) -> opcua::types::NodeId {
        opcua::types::NodeId::new(node.namespace, node.identifier)
    }

    /// Numeric node ids only; anything else cannot belong to the mapped range.
    fn from_opcua_node_id(node: &opcua::types::NodeId) -> Option<NodeId> {
        match &node.identifier {
            opcua::types::Identifier::Numeric(v) => Some(NodeId::new(node.namespace, *v)),
            _ => None,
        }
    }

    fn from_variant(variant: &Variant) -> NodeValue {
        match variant {
            Variant::Empty => NodeValue::Empty,
            Variant::Boolean(v) => NodeValue::Boolean(*v),
            Variant::SByte(v) => NodeValue::SByte(*v),
            Variant::Byte(v) => NodeValue::Byte(*v),
            Variant::Int16(v) => NodeValue::Int16(*v),
            Variant::UInt16(v) => NodeValue::UInt16(*v),
            Variant::Int32(v) => NodeValue::Int32(*v),
            Variant::UInt32(v) => NodeValue::UInt32(*v),
            Variant::Int64(v) => NodeValue::Int64(*v),
            Variant::UInt64(v) => NodeValue::UInt64(*v),
            Variant::Float(v) => NodeValue::Float(*v),
            Variant::Double(v) => NodeValue::Double(*v),
            Variant::String(v) => NodeValue::String(v.as_ref().to_string()),
            other => NodeValue::String(format!("{:?}", other)),
        }
    }

    fn to_variant(value: &NodeValue) -> Variant {
        match value {
            NodeValue::Empty => Variant::Empty,
            NodeValue::Boolean(v) => Variant::Boolean(*v),
            NodeValue::SByte(v) => Variant::SByte(*v),
            NodeValue::Byte(v) => Variant::Byte(*v),
            NodeValue::Int16(v) => Variant::Int16(*v),
            NodeValue::UInt16(v) => Variant::UInt16(*v),
            NodeValue::Int32(v) => Variant::Int32(*v),
            NodeValue::UInt32(v) => Variant::UInt32(*v),
            NodeValue::Int64(v) => Variant::Int64(*v),
            NodeValue::UInt64(v) => Variant::UInt64(*v),
            NodeValue::Float(v) => Variant::Float(*v),
            NodeValue::Double(v) => Variant::Double(*v),
            NodeValue::String(v) => Variant::String(UAString::from(v.as_str())),
        }
    }

    /// Every value an item reported since the last publish, oldest first.
    ///
    /// The server may batch several changes of one node into a single
    /// publish; `last_value` is only used when no batch was recorded.
    fn item_changes(
        item_node: &opcua::types::NodeId,
        values: &[DataValue],
        last_value: &DataValue,
    ) -> Vec<DataChange> {
        let Some(node) = Self::from_opcua_node_id(item_node) else {
            debug!(node = %item_node, "Ignoring change on non-numeric node");
            return Vec::new();
        };

        let to_change = |data_value: &DataValue| {
            let value = data_value
                .value
                .as_ref()
                .map(Self::from_variant)
                .unwrap_or(NodeValue::Empty);
            DataChange::new(node, value)
        };

        if values.is_empty() {
            vec![to_change(last_value)]
        } else {
            values.iter().map(to_change).collect()
        }
    }

    /// Forward changed monitored items into the notification queue.
    fn forward_changes(sink: &DataChangeSender, items: &[&MonitoredItem]) {
        for item in items {
            let changes = Self::item_changes(
                &item.item_to_monitor().node_id,
                item.values(),
                item.last_value(),
            );

            for change in changes {
                trace!(node = %change.node, value = %change.value, "Data change");
                if sink.send(change).is_err() {
                    debug!("Notification queue closed, dropping change");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl NodeTransport for OpcUaNodes {
    async fn connect(&mut self) -> Result<(), BridgeError> {
        info!(endpoint = %self.config.endpoint, "Connecting to OPC UA server");

        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || Self::open_session(&config))
            .await
            .map_err(|e| BridgeError::connection(&self.config.endpoint, e))?
            .map_err(|e| BridgeError::connection(&self.config.endpoint, e))?;

        self.session_stop = Some(Session::run_async(session.clone()));
        self.session = Some(session);

        info!(endpoint = %self.config.endpoint, "Connected to OPC UA server");
        Ok(())
    }

    async fn read_value(&self, node: &NodeId) -> Result<NodeValue, BridgeError> {
        let read_value_id = ReadValueId {
            node_id: Self::to_opcua_node_id(node),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        };

        trace!(node = %node, "Reading node value");

        let results = self
            .call(move |session| session.read(&[read_value_id], TimestampsToReturn::Both, 0.0))
            .await
            .map_err(|message| BridgeError::NodeRead {
                node: *node,
                message,
            })?;

        let data_value = results.into_iter().next().ok_or_else(|| BridgeError::NodeRead {
            node: *node,
            message: "Empty read response".to_string(),
        })?;

        if let Some(status) = data_value.status {
            if !status.is_good() {
                return Err(BridgeError::NodeRead {
                    node: *node,
                    message: status.to_string(),
                });
            }
        }

        Ok(data_value
            .value
            .as_ref()
            .map(Self::from_variant)
            .unwrap_or(NodeValue::Empty))
    }

    async fn write_value(&self, node: &NodeId, value: NodeValue) -> Result<(), BridgeError> {
        let write_value = WriteValue {
            node_id: Self::to_opcua_node_id(node),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            value: DataValue::new_now(Self::to_variant(&value)),
        };

        trace!(node = %node, value = %value, "Writing node value");

        let results = self
            .call(move |session| session.write(&[write_value]))
            .await
            .map_err(|message| BridgeError::NodeWrite {
                node: *node,
                message,
            })?;

        match results.first() {
            Some(status) if status.is_good() => {
                info!(node = %node, value = %value, "Wrote node value");
                Ok(())
            }
            Some(status) => Err(BridgeError::NodeWrite {
                node: *node,
                message: status.to_string(),
            }),
            None => Err(BridgeError::NodeWrite {
                node: *node,
                message: "Empty write response".to_string(),
            }),
        }
    }

    async fn create_subscription(
        &self,
        publishing_interval: Duration,
        sink: DataChangeSender,
    ) -> Result<SubscriptionHandle, BridgeError> {
        trace!(interval = ?publishing_interval, "Creating subscription");

        let interval_ms = publishing_interval.as_millis() as f64;
        let subscription_id = self
            .call(move |session| {
                session.create_subscription(
                    interval_ms,
                    10,
                    30,
                    0,
                    0,
                    true,
                    DataChangeCallback::new(move |changed_items| {
                        Self::forward_changes(&sink, changed_items);
                    }),
                )
            })
            .await
            .map_err(|e| BridgeError::subscription(format!("Failed to create subscription: {}", e)))?;

        self.subscriptions
            .write()
            .await
            .insert(subscription_id, HashSet::new());

        info!(subscription_id, interval = ?publishing_interval, "Created subscription");
        Ok(SubscriptionHandle(subscription_id))
    }

    async fn monitor(
        &self,
        subscription: SubscriptionHandle,
        node: &NodeId,
        sampling_interval: Duration,
    ) -> Result<MonitorHandle, BridgeError> {
        let monitor_error = |message: String| BridgeError::MonitorCreation {
            node: *node,
            message,
        };

        if !self.subscriptions.read().await.contains_key(&subscription.0) {
            return Err(monitor_error(format!(
                "Unknown subscription {}",
                subscription.0
            )));
        }

        let request = MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id: Self::to_opcua_node_id(node),
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            },
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                sampling_interval: sampling_interval.as_millis() as f64,
                filter: ExtensionObject::null(),
                queue_size: 10,
                discard_oldest: true,
                client_handle: 0,
            },
        };

        let subscription_id = subscription.0;
        let results = self
            .call(move |session| {
                session.create_monitored_items(
                    subscription_id,
                    TimestampsToReturn::Both,
                    &[request],
                )
            })
            .await
            .map_err(monitor_error)?;

        let result = results
            .into_iter()
            .next()
            .ok_or_else(|| monitor_error("Empty create response".to_string()))?;

        if !result.status_code.is_good() {
            return Err(monitor_error(result.status_code.to_string()));
        }

        if let Some(items) = self.subscriptions.write().await.get_mut(&subscription_id) {
            items.insert(result.monitored_item_id);
        }

        debug!(
            node = %node,
            subscription_id,
            monitored_item_id = result.monitored_item_id,
            "Created monitored item"
        );
        Ok(MonitorHandle(result.monitored_item_id))
    }

    async fn cancel(
        &self,
        subscription: SubscriptionHandle,
        monitor: MonitorHandle,
    ) -> Result<(), BridgeError> {
        let was_live = self
            .subscriptions
            .write()
            .await
            .get_mut(&subscription.0)
            .map(|items| items.remove(&monitor.0))
            .unwrap_or(false);

        if !was_live {
            debug!(
                subscription_id = subscription.0,
                monitored_item_id = monitor.0,
                "Monitored item already cancelled"
            );
            return Ok(());
        }

        let subscription_id = subscription.0;
        let item_id = monitor.0;
        let results = self
            .call(move |session| session.delete_monitored_items(subscription_id, &[item_id]))
            .await
            .map_err(|e| BridgeError::subscription(format!("Failed to cancel monitored item {}: {}", item_id, e)))?;

        if let Some(status) = results.first().filter(|s| !s.is_good()) {
            return Err(BridgeError::subscription(format!(
                "Failed to cancel monitored item {}: {}",
                item_id, status
            )));
        }

        debug!(subscription_id, monitored_item_id = item_id, "Cancelled monitored item");
        Ok(())
    }

    async fn delete_subscription(
        &self,
        subscription: SubscriptionHandle,
    ) -> Result<(), BridgeError> {
        if self.subscriptions.write().await.remove(&subscription.0).is_none() {
            debug!(subscription_id = subscription.0, "Subscription already deleted");
            return Ok(());
        }

        let subscription_id = subscription.0;
        let status = self
            .call(move |session| session.delete_subscription(subscription_id))
            .await
            .map_err(|e| BridgeError::subscription(format!("Failed to delete subscription: {}", e)))?;

        if !status.is_good() {
            return Err(BridgeError::subscription(format!(
                "Failed to delete subscription: {}",
                status
            )));
        }

        info!(subscription_id, "Deleted subscription");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BridgeError> {
        self.subscriptions.write().await.clear();

        if let Some(stop) = self.session_stop.take() {
            let _ = stop.send(SessionCommand::Stop);
        }

        let Some(session) = self.session.take() else {
            debug!(endpoint = %self.config.endpoint, "OPC UA session already closed");
            return Ok(());
        };

        info!(endpoint = %self.config.endpoint, "Disconnecting from OPC UA server");

        tokio::task::spawn_blocking(move || session.read().disconnect())
            .await
            .map_err(|e| BridgeError::connection(&self.config.endpoint, e))?;

        info!(endpoint = %self.config.endpoint, "Disconnected from OPC UA server");
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
