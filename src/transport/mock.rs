//! Mock PLC transport for tests and hardware-free simulation.
//!
//! `MockPlc` holds a node store seeded by tests, records every RPC call, and
//! can be scripted to fail the next call with a chosen error. Move RPCs flip
//! the axis status to `MOVING` so completion polling has something realistic
//! to chew on; tests decide when the axis reaches `STANDING`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{NodeValue, PlcTransport};
use crate::error::{AppResult, BenchError};

/// One recorded RPC invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    /// Object node the method was called on.
    pub object_node: String,
    /// Method browse name, e.g. `"4:RPC_MoveAbs"`.
    pub method: String,
    /// Positional input arguments.
    pub args: Vec<NodeValue>,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: HashMap<String, NodeValue>,
    calls: Vec<RpcCall>,
    fail_next_call: Option<BenchError>,
}

/// In-memory PLC double.
#[derive(Debug, Default, Clone)]
pub struct MockPlc {
    state: Arc<Mutex<MockState>>,
}

impl MockPlc {
    /// New mock with an empty node store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or updates one node.
    pub async fn set_value(&self, node_id: &str, value: impl Into<NodeValue>) {
        self.state
            .lock()
            .await
            .nodes
            .insert(node_id.to_string(), value.into());
    }

    /// Seeds the status/state pair of an axis under `prefix`.
    pub async fn set_axis(&self, prefix: &str, status: &str, state: &str) {
        let mut guard = self.state.lock().await;
        guard
            .nodes
            .insert(format!("{prefix}.stat.sStatus"), NodeValue::from(status));
        guard
            .nodes
            .insert(format!("{prefix}.stat.sState"), NodeValue::from(state));
        guard
            .nodes
            .entry(format!("{prefix}.stat.sSubstate"))
            .or_insert_with(|| NodeValue::from(""));
    }

    /// Makes the next `call_method` fail with `error` (returned once).
    pub async fn fail_next_call(&self, error: BenchError) {
        self.state.lock().await.fail_next_call = Some(error);
    }

    /// Snapshot of all recorded RPC calls.
    pub async fn calls(&self) -> Vec<RpcCall> {
        self.state.lock().await.calls.clone()
    }

    /// Recorded calls of one method name.
    pub async fn calls_of(&self, method: &str) -> Vec<RpcCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PlcTransport for MockPlc {
    async fn call_method(
        &self,
        object_node: &str,
        method: &str,
        args: Vec<NodeValue>,
    ) -> AppResult<Vec<NodeValue>> {
        let mut guard = self.state.lock().await;
        if let Some(error) = guard.fail_next_call.take() {
            return Err(error);
        }
        guard.calls.push(RpcCall {
            object_node: object_node.to_string(),
            method: method.to_string(),
            args: args.clone(),
        });

        // Move RPCs put the axis in motion; tests flip it back to STANDING.
        if method.ends_with("RPC_MoveAbs") || method.ends_with("RPC_MoveRel") {
            guard.nodes.insert(
                format!("{object_node}.stat.sStatus"),
                NodeValue::from("MOVING"),
            );
            if method.ends_with("RPC_MoveAbs") {
                if let Some(target) = args.first().and_then(NodeValue::as_f64) {
                    guard.nodes.insert(
                        format!("{object_node}.ctrl.lrPosition"),
                        NodeValue::Float(target),
                    );
                }
            }
        } else if method.ends_with("RPC_Stop") {
            guard.nodes.insert(
                format!("{object_node}.stat.sStatus"),
                NodeValue::from("STANDING"),
            );
        }
        Ok(Vec::new())
    }

    async fn read_value(&self, node_id: &str) -> AppResult<NodeValue> {
        self.state
            .lock()
            .await
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| BenchError::Transport(format!("no such node: '{node_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_back_seeded_values() {
        let plc = MockPlc::new();
        plc.set_value("ns=4;s=X.stat.lrPosActual", 1.25).await;
        assert_eq!(
            plc.read_f64("ns=4;s=X.stat.lrPosActual").await.unwrap(),
            1.25
        );
        assert!(plc.read_value("ns=4;s=missing").await.is_err());
    }

    #[tokio::test]
    async fn test_move_rpc_sets_axis_moving_and_records_call() {
        let plc = MockPlc::new();
        plc.set_axis("ns=4;s=DL", "STANDING", "OPERATIONAL").await;

        plc.call_method(
            "ns=4;s=DL",
            "4:RPC_MoveAbs",
            vec![NodeValue::Float(2.5), NodeValue::Float(0.1)],
        )
        .await
        .unwrap();

        assert_eq!(
            plc.read_string("ns=4;s=DL.stat.sStatus").await.unwrap(),
            "MOVING"
        );
        assert_eq!(
            plc.read_f64("ns=4;s=DL.ctrl.lrPosition").await.unwrap(),
            2.5
        );
        let calls = plc.calls_of("4:RPC_MoveAbs").await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[0], NodeValue::Float(2.5));
    }

    #[tokio::test]
    async fn test_scripted_failure_fires_once() {
        let plc = MockPlc::new();
        plc.fail_next_call(BenchError::Transport("link down".into()))
            .await;

        let err = plc
            .call_method("ns=4;s=DL", "4:RPC_Init", vec![])
            .await
            .unwrap_err();
        assert!(err.is_transient());

        // Next call goes through and is recorded.
        plc.call_method("ns=4;s=DL", "4:RPC_Init", vec![])
            .await
            .unwrap();
        assert_eq!(plc.calls().await.len(), 1);
    }
}
