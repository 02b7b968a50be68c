//! Stand-in [`NodeActionRunner`]: actual node provisioning is out of scope,
//! so this just simulates the terminal outcome a real backend would report.

use std::time::Duration;

use async_trait::async_trait;
use fleetctl_common::EngineError;
use fleetctl_engine::traits::NodeActionRunner;
use fleetctl_types::{NodeActionKind, NodeId};

pub struct SimulatedNodeRunner {
    pub delay: Duration,
}

#[async_trait]
impl NodeActionRunner for SimulatedNodeRunner {
    async fn run(
        &self,
        kind: NodeActionKind,
        node_id: NodeId,
        _inputs: serde_json::Value,
    ) -> Result<(), EngineError> {
        tracing::info!(%node_id, ?kind, "simulating node action");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
