//! The structurally-parsed graph handed to [`CfgModel::from_raw`](super::CfgModel::from_raw).
//!
//! Deserializing an on-disk graph file (XML, GraphML, a pickled legacy
//! format, whatever) is somebody else's problem. By the time a [`RawGraph`]
//! reaches this crate it's just nodes and edges with string attributes —
//! none of the auxiliary-node exploding, line-range closing, or basic-block
//! combining that [`super::normalize`] does has happened yet.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One node as it appears in the unfixed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub procedure: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub lines: Vec<u32>,
    #[serde(default)]
    pub syntax: Option<String>,
    #[serde(default)]
    pub csi_label: Option<String>,
    /// Catch-all for attributes not otherwise modeled (`when`, `uses`, `defs`, …).
    #[serde(default)]
    pub attrs: HashMap<String, String>,
}

/// One edge as it appears in the unfixed graph. Multi-edges between the
/// same endpoints are legal and are distinguished by `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub when: Option<String>,
}

/// The whole unfixed graph.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawGraph {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}
