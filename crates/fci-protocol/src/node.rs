//! Node index and channel topic types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of this node among the workers of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    /// Index of the node that submits the test inventory
    pub const LEADER: NodeIndex = NodeIndex(0);

    /// Create a new node index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this node is responsible for the inventory
    pub fn is_leader(&self) -> bool {
        *self == Self::LEADER
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u32> for NodeIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

/// Logical channel shared by every node of one build
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Channel name prefix used by the orchestrator
    pub const PREFIX: &'static str = "test_orchestrator";

    /// Build the topic for a run key and build id
    pub fn for_build(run_key: &str, build_id: &str) -> Self {
        Self(format!("{}:{}-{}", Self::PREFIX, run_key, build_id))
    }

    /// Get the topic string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
