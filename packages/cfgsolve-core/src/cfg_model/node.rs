use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Kind of a CFG node. The raw format carries many more syntactic kinds
/// than the solvers care about; anything not listed explicitly falls into
/// [`NodeKind::Other`] and is still handled uniformly by flow logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Entry,
    Exit,
    CallSite,
    Crash,
    Expression,
    Jump,
    Return,
    SwitchCase,
    Auxiliary,
    GlobalActualIn,
    GlobalActualOut,
    GlobalFormalIn,
    GlobalFormalOut,
    Decl,
    Other(String),
}

impl NodeKind {
    pub fn from_raw(s: &str) -> Self {
        match s {
            "entry" => NodeKind::Entry,
            "exit" => NodeKind::Exit,
            "call-site" => NodeKind::CallSite,
            "crash" => NodeKind::Crash,
            "expression" => NodeKind::Expression,
            "jump" => NodeKind::Jump,
            "return" => NodeKind::Return,
            "switch-case" => NodeKind::SwitchCase,
            "auxiliary" => NodeKind::Auxiliary,
            "global-actual-in" => NodeKind::GlobalActualIn,
            "global-actual-out" => NodeKind::GlobalActualOut,
            "global-formal-in" => NodeKind::GlobalFormalIn,
            "global-formal-out" => NodeKind::GlobalFormalOut,
            "decl" => NodeKind::Decl,
            other => NodeKind::Other(other.to_string()),
        }
    }

    pub fn is_global_formal_or_actual(&self) -> bool {
        matches!(
            self,
            NodeKind::GlobalActualIn
                | NodeKind::GlobalActualOut
                | NodeKind::GlobalFormalIn
                | NodeKind::GlobalFormalOut
        )
    }
}

/// A normalised CFG node.
///
/// `lines` and `collapsed_nodes` are mutated in place by the normalisation
/// and basic-block-collapse passes; everything else is set once at
/// construction from a [`crate::cfg_model::raw::RawNode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub procedure: Option<String>,
    pub file: Option<String>,
    pub lines: BTreeSet<u32>,
    pub syntax: Option<String>,
    pub csi_label: Option<String>,
    /// Sentinel def/use set for global-formal/global-actual nodes
    /// (phase 1 of normalisation). `true` once the sentinel has been applied.
    pub uses_pp_all: bool,
    /// Ids of nodes absorbed into this one by basic-block collapse, in the
    /// order they were merged. Empty for a node that hasn't been collapsed
    /// into.
    pub collapsed_nodes: Vec<String>,
    /// True for a `return` node whose lines are a subset of some exit
    /// node's lines in the same function (phase 9).
    pub implicit_return: bool,
}

impl Node {
    pub fn function_id(&self) -> Option<&str> {
        self.procedure.as_deref()
    }

    pub fn is_true_callsite(&self, has_outgoing_inter_control: bool) -> bool {
        matches!(self.kind, NodeKind::CallSite) && has_outgoing_inter_control
    }
}
