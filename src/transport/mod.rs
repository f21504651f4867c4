//! PLC transport seam.
//!
//! The bench actuators live behind an OPC-UA server on the PLC. This module
//! defines the narrow surface the rest of the crate uses to talk to it:
//! method calls on object nodes (the `RPC_*` family) and single or batched
//! node reads. The wire client itself is out of scope and plugged in behind
//! [`PlcTransport`]; tests and simulation use [`mock::MockPlc`].
//!
//! Failures split into two kinds on purpose: [`crate::error::BenchError::Transport`]
//! for network/wire trouble (retryable) and
//! [`crate::error::BenchError::ActuatorFault`] for faults the device itself
//! reports (operator action needed). Command code branches on that split.

pub mod mock;

use async_trait::async_trait;

use crate::error::{AppResult, BenchError};

/// A value read from or passed to a PLC node.
///
/// OPC-UA nodes are dynamically typed; reads surface whichever variant the
/// server holds and the accessors convert with a typed error on mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// 64-bit float (`lr*` nodes).
    Float(f64),
    /// Integer.
    Int(i64),
    /// String (`s*` status nodes, PLC timestamps).
    Text(String),
    /// Boolean (`b*` flag nodes).
    Bool(bool),
}

impl NodeValue {
    /// The value as a float. Integers widen; other variants are a mismatch.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NodeValue::Float(v) => Some(*v),
            NodeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NodeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NodeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for NodeValue {
    fn from(v: f64) -> Self {
        NodeValue::Float(v)
    }
}

impl From<i64> for NodeValue {
    fn from(v: i64) -> Self {
        NodeValue::Int(v)
    }
}

impl From<&str> for NodeValue {
    fn from(v: &str) -> Self {
        NodeValue::Text(v.to_string())
    }
}

impl From<String> for NodeValue {
    fn from(v: String) -> Self {
        NodeValue::Text(v)
    }
}

impl From<bool> for NodeValue {
    fn from(v: bool) -> Self {
        NodeValue::Bool(v)
    }
}

fn type_mismatch(node_id: &str, value: &NodeValue, expected: &str) -> BenchError {
    BenchError::Transport(format!(
        "node '{node_id}' returned {value:?}, expected {expected}"
    ))
}

/// Connection to the PLC's OPC-UA surface.
#[async_trait]
pub trait PlcTransport: Send + Sync {
    /// Calls `method` on `object_node` with positional arguments and returns
    /// the output arguments.
    async fn call_method(
        &self,
        object_node: &str,
        method: &str,
        args: Vec<NodeValue>,
    ) -> AppResult<Vec<NodeValue>>;

    /// Reads one node.
    async fn read_value(&self, node_id: &str) -> AppResult<NodeValue>;

    /// Reads several nodes in one round trip where the client supports it.
    /// The default falls back to sequential single reads.
    async fn read_values(&self, node_ids: &[String]) -> AppResult<Vec<NodeValue>> {
        let mut values = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            values.push(self.read_value(node_id).await?);
        }
        Ok(values)
    }

    /// Reads one node as a float.
    async fn read_f64(&self, node_id: &str) -> AppResult<f64> {
        let value = self.read_value(node_id).await?;
        value
            .as_f64()
            .ok_or_else(|| type_mismatch(node_id, &value, "float"))
    }

    /// Reads one node as a string.
    async fn read_string(&self, node_id: &str) -> AppResult<String> {
        let value = self.read_value(node_id).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_mismatch(node_id, &value, "string"))
    }

    /// Reads one node as a bool.
    async fn read_bool(&self, node_id: &str) -> AppResult<bool> {
        let value = self.read_value(node_id).await?;
        value
            .as_bool()
            .ok_or_else(|| type_mismatch(node_id, &value, "bool"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_value_accessors() {
        assert_eq!(NodeValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(NodeValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(NodeValue::Text("STANDING".into()).as_f64(), None);
        assert_eq!(
            NodeValue::Text("STANDING".into()).as_str(),
            Some("STANDING")
        );
        assert_eq!(NodeValue::Bool(true).as_bool(), Some(true));
        assert_eq!(NodeValue::Bool(true).as_str(), None);
    }

    #[test]
    fn test_node_value_from_impls() {
        assert_eq!(NodeValue::from(2.0), NodeValue::Float(2.0));
        assert_eq!(NodeValue::from(7i64), NodeValue::Int(7));
        assert_eq!(NodeValue::from("x"), NodeValue::Text("x".into()));
        assert_eq!(NodeValue::from(false), NodeValue::Bool(false));
    }
}
