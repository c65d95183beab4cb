//! Bridge lifecycle: startup sync, change propagation and teardown.
//!
//! ```text
//! Disconnected -> Syncing -> Monitoring -> ShuttingDown -> Stopped
//!       \______________________________________________/
//!                     (connection failure)
//! ```
//!
//! Notifications are consumed one at a time from a single queue, and each
//! register write is awaited before the next notification is taken, so at
//! most one register write is ever in flight.

use std::fmt;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::BridgeSettings;
use crate::error::BridgeError;
use crate::node::{
    DataChange, DataChangeReceiver, MonitorHandle, NodeId, NodeTransport, NodeValue,
    SubscriptionHandle,
};
use crate::register::RegisterTransport;

/// Lifecycle state of a [`BridgeController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Disconnected,
    Syncing,
    Monitoring,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Syncing => "syncing",
            BridgeState::Monitoring => "monitoring",
            BridgeState::ShuttingDown => "shutting_down",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters collected over the life of the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeReport {
    /// Nodes written during the startup sync.
    pub nodes_synced: u64,
    /// Monitors successfully created.
    pub monitors_created: u64,
    /// Notifications taken from the queue.
    pub notifications_received: u64,
    /// Registers written from notifications.
    pub registers_written: u64,
    /// Notifications for nodes outside the mapped range.
    pub notifications_ignored: u64,
    /// Notifications whose value could not be written (conversion or transport failure).
    pub write_failures: u64,
    /// Notifications still queued when teardown started.
    pub notifications_discarded: u64,
}

/// The subscription owned by the controller and its per-node monitors.
#[derive(Debug)]
pub struct ActiveSubscription {
    pub handle: SubscriptionHandle,
    pub monitors: Vec<(NodeId, MonitorHandle)>,
}

/// Why the monitoring loop ended.
enum StopReason {
    Signal,
    QueueClosed,
}

/// Keeps a register block and a range of nodes consistent.
pub struct BridgeController<R, N> {
    settings: BridgeSettings,
    registers: R,
    nodes: N,
    state: BridgeState,
    subscription: Option<ActiveSubscription>,
    notifications: Option<DataChangeReceiver>,
    registers_connected: bool,
    nodes_connected: bool,
    report: BridgeReport,
}

impl<R, N> BridgeController<R, N>
where
    R: RegisterTransport,
    N: NodeTransport,
{
    /// Create a controller over unconnected transports.
    pub fn new(settings: BridgeSettings, registers: R, nodes: N) -> Self {
        Self {
            settings,
            registers,
            nodes,
            state: BridgeState::Disconnected,
            subscription: None,
            notifications: None,
            registers_connected: false,
            nodes_connected: false,
            report: BridgeReport::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Counters collected so far.
    pub fn report(&self) -> &BridgeReport {
        &self.report
    }

    /// The live subscription, if monitoring has started.
    pub fn subscription(&self) -> Option<&ActiveSubscription> {
        self.subscription.as_ref()
    }

    /// Register-side transport.
    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Node-side transport.
    pub fn nodes(&self) -> &N {
        &self.nodes
    }

    fn transition(&mut self, next: BridgeState) {
        debug!(from = %self.state, to = %next, "Bridge state change");
        self.state = next;
    }

    /// Run the full lifecycle until `shutdown` turns `true` or the notification
    /// queue closes.
    ///
    /// Returns `Err` only when a transport cannot be connected; the controller
    /// is then `Stopped` without having synced or monitored anything.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<BridgeReport, BridgeError> {
        self.connect().await?;
        self.sync_initial_values().await;

        match self.start_monitoring().await {
            Ok(()) => {
                let reason = self.monitor_loop(&mut shutdown).await;
                match reason {
                    StopReason::Signal => info!("Shutdown requested"),
                    StopReason::QueueClosed => {
                        warn!("Notification channel closed, shutting down")
                    }
                }
            }
            Err(e) => error!(error = %e, "Cannot monitor nodes, shutting down"),
        }

        self.shutdown().await;
        Ok(self.report)
    }

    /// Connect both transports: `Disconnected -> Syncing`.
    ///
    /// On failure every transport that did connect is closed again and the
    /// controller is `Stopped`.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        if let Err(e) = self.registers.connect().await {
            error!(target_device = %self.registers.target(), error = %e, "Modbus connection failed");
            self.transition(BridgeState::Stopped);
            return Err(e);
        }
        self.registers_connected = true;

        if let Err(e) = self.nodes.connect().await {
            error!(endpoint = %self.nodes.endpoint(), error = %e, "OPC UA connection failed");
            self.close_transports().await;
            self.transition(BridgeState::Stopped);
            return Err(e);
        }
        self.nodes_connected = true;

        self.transition(BridgeState::Syncing);
        Ok(())
    }

    /// Push the register block to the mapped nodes.
    ///
    /// A failed or short read skips the whole step; partial data is never
    /// partially applied. Returns the number of nodes written.
    pub async fn sync_initial_values(&mut self) -> usize {
        let mapper = self.settings.mapper;
        let address = self.settings.start_address;
        let count = mapper.count();

        let block = match self.registers.read_registers(address, count).await {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "Initial register read failed, skipping sync");
                return 0;
            }
        };

        if block.len() < usize::from(count) {
            warn!(
                address,
                expected = count,
                received = block.len(),
                "Incomplete register block, skipping sync"
            );
            return 0;
        }

        info!(address, ?block, "Read register block");

        let mut written = 0;
        for (node, &raw) in mapper.node_ids().zip(block.iter()) {
            let value =
                initial_node_value(&self.nodes, self.settings.coerce_to_node_type, &node, raw)
                    .await;
            match self.nodes.write_value(&node, value).await {
                Ok(()) => written += 1,
                Err(e) => warn!(node = %node, value = raw, error = %e, "Initial node write failed"),
            }
        }

        self.report.nodes_synced += written as u64;
        info!(written, total = count, "Initial sync complete");
        written
    }

    /// Create the subscription and one monitor per mapped node:
    /// `Syncing -> Monitoring`.
    ///
    /// A node that cannot be monitored is logged and left out. Failure to
    /// create the subscription itself is returned.
    pub async fn start_monitoring(&mut self) -> Result<(), BridgeError> {
        let (sink, receiver) = mpsc::unbounded_channel();

        let handle = match self
            .nodes
            .create_subscription(self.settings.publishing_interval, sink)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.transition(BridgeState::ShuttingDown);
                return Err(e);
            }
        };

        let mut monitors = Vec::new();
        for node in self.settings.mapper.node_ids() {
            match self
                .nodes
                .monitor(handle, &node, self.settings.sampling_interval)
                .await
            {
                Ok(monitor) => monitors.push((node, monitor)),
                Err(e) => warn!(node = %node, error = %e, "Continuing without this node"),
            }
        }

        self.report.monitors_created = monitors.len() as u64;
        info!(
            monitored = monitors.len(),
            mapped = self.settings.mapper.count(),
            "Monitoring nodes"
        );

        self.subscription = Some(ActiveSubscription { handle, monitors });
        self.notifications = Some(receiver);
        self.transition(BridgeState::Monitoring);
        Ok(())
    }

    async fn monitor_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> StopReason {
        let Some(mut receiver) = self.notifications.take() else {
            return StopReason::QueueClosed;
        };

        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Signal;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // A dropped sender can never signal again; treat it as a stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Signal;
                    }
                }

                change = receiver.recv() => match change {
                    Some(change) => {
                        self.handle_notification(change).await;
                    }
                    None => break StopReason::QueueClosed,
                },
            }
        };

        self.notifications = Some(receiver);
        reason
    }

    /// Translate one notification into a register write.
    ///
    /// Returns `true` when a register was written.
    pub async fn handle_notification(&mut self, change: DataChange) -> bool {
        self.report.notifications_received += 1;
        debug!(node = %change.node, value = %change.value, "Data change");

        let offset = match self.settings.mapper.to_register_offset(&change.node) {
            Ok(offset) => offset,
            Err(e) => {
                self.report.notifications_ignored += 1;
                debug!(error = %e, "Ignoring notification");
                return false;
            }
        };

        let Some(address) = self.settings.register_address(offset) else {
            self.report.notifications_ignored += 1;
            warn!(node = %change.node, offset, "Register address overflows, ignoring");
            return false;
        };

        let Some(value) = change.value.to_register_value() else {
            self.report.write_failures += 1;
            let e = BridgeError::ValueConversion {
                node: change.node,
                value: change.value.to_string(),
            };
            warn!(error = %e, "Skipping register write");
            return false;
        };

        match self.registers.write_register(address, value).await {
            Ok(()) => {
                self.report.registers_written += 1;
                true
            }
            Err(e) => {
                self.report.write_failures += 1;
                warn!(node = %change.node, error = %e, "Register write failed");
                false
            }
        }
    }

    /// Tear everything down: `-> ShuttingDown -> Stopped`.
    ///
    /// Monitors are cancelled first, then the subscription is deleted, then
    /// both transports are closed. Every step runs even if an earlier one
    /// failed. Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        if self.state == BridgeState::Stopped {
            return;
        }
        self.transition(BridgeState::ShuttingDown);

        if let Some(mut receiver) = self.notifications.take() {
            receiver.close();
            while receiver.try_recv().is_ok() {
                self.report.notifications_discarded += 1;
            }
            if self.report.notifications_discarded > 0 {
                debug!(
                    discarded = self.report.notifications_discarded,
                    "Discarded pending notifications"
                );
            }
        }

        if let Some(subscription) = self.subscription.take() {
            for (node, monitor) in &subscription.monitors {
                if let Err(e) = self.nodes.cancel(subscription.handle, *monitor).await {
                    warn!(node = %node, error = %e, "Failed to cancel monitor");
                }
            }

            if let Err(e) = self.nodes.delete_subscription(subscription.handle).await {
                warn!(error = %e, "Failed to delete subscription");
            }
        }

        self.close_transports().await;
        self.transition(BridgeState::Stopped);
        info!(report = ?self.report, "Bridge stopped");
    }

    async fn close_transports(&mut self) {
        if self.nodes_connected {
            self.nodes_connected = false;
            if let Err(e) = self.nodes.disconnect().await {
                warn!(error = %e, "Failed to close OPC UA session");
            }
        }

        if self.registers_connected {
            self.registers_connected = false;
            if let Err(e) = self.registers.close().await {
                warn!(error = %e, "Failed to close Modbus connection");
            }
        }
    }
}

/// Value written to `node` for a register during the startup sync.
async fn initial_node_value<N: NodeTransport>(
    nodes: &N,
    coerce_to_node_type: bool,
    node: &NodeId,
    raw: u16,
) -> NodeValue {
    if !coerce_to_node_type {
        return NodeValue::UInt16(raw);
    }

    match nodes.read_value(node).await {
        Ok(current) => current.register_value_like(raw),
        Err(e) => {
            debug!(node = %node, error = %e, "Node type unknown, writing as UInt16");
            NodeValue::UInt16(raw)
        }
    }
}
