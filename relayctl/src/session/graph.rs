//! Flow graphs as drawn in the flow builder.
//!
//! A graph is an ordered list of nodes plus edges between them. Node order is significant: chat
//! nodes run in the order they appear. Node ids are unique and every edge endpoint names an
//! existing node.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FlowNode {
    pub id: String,
    /// Renderer type tag, e.g. `custom`
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub position: NodePosition,
    /// Free-form node configuration. `nodeType` names the node's role when present.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FlowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
}

/// Role of a node when chatting with a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// `LLM Chat`: general chat with the node's prompt as system message
    LlmChat,
    /// Question answering over an uploaded document
    Document,
    /// Question answering over a web page
    Url,
    Antonym,
    Other(String),
}

impl NodeKind {
    fn parse(tag: &str) -> Self {
        match tag {
            "LLM Chat" => NodeKind::LlmChat,
            "LLM Chat PDF" | "Document" => NodeKind::Document,
            "LLM Chat URL" | "URL" => NodeKind::Url,
            "LLM Antonim" | "Antonym" => NodeKind::Antonym,
            other => NodeKind::Other(other.to_string()),
        }
    }
}

impl FlowNode {
    /// The node's role, read from `data.nodeType` and falling back to the type tag.
    pub fn kind(&self) -> NodeKind {
        NodeKind::parse(self.data_str("nodeType").unwrap_or(&self.node_type))
    }

    /// A string field of the configuration payload
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// A numeric field of the configuration payload, accepting numbers and numeric strings
    pub fn data_u32(&self, key: &str) -> Option<u32> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn prompt(&self) -> &str {
        self.data_str("prompt").unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node id must not be empty")]
    EmptyNodeId,
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("edge {edge} references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },
}

/// Borrowed view over a graph's nodes and edges
#[derive(Debug, Clone, Copy)]
pub struct FlowGraph<'a> {
    pub nodes: &'a [FlowNode],
    pub edges: &'a [FlowEdge],
}

impl<'a> FlowGraph<'a> {
    pub fn new(nodes: &'a [FlowNode], edges: &'a [FlowEdge]) -> Self {
        Self { nodes, edges }
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::with_capacity(self.nodes.len());
        for node in self.nodes {
            if node.id.trim().is_empty() {
                return Err(GraphError::EmptyNodeId);
            }
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(GraphError::DanglingEdge {
                        edge: edge.id.clone().unwrap_or_else(|| format!("{}->{}", edge.source, edge.target)),
                        node: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Chat nodes in node order
    pub fn chat_nodes(&self) -> impl Iterator<Item = &'a FlowNode> {
        self.nodes.iter().filter(|n| n.kind() == NodeKind::LlmChat)
    }

    /// First node of the given kind
    pub fn find(&self, kind: NodeKind) -> Option<&'a FlowNode> {
        self.nodes.iter().find(|n| n.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            node_type: "custom".to_string(),
            position: NodePosition::default(),
            data: json!({ "nodeType": node_type }),
        }
    }

    fn edge(source: &str, target: &str) -> FlowEdge {
        FlowEdge {
            id: None,
            source: source.to_string(),
            target: target.to_string(),
            edge_type: None,
        }
    }

    #[test]
    fn test_valid_graph() {
        let nodes = vec![node("1", "Start"), node("2", "LLM Chat"), node("3", "END")];
        let edges = vec![edge("1", "2"), edge("2", "3")];
        assert_eq!(FlowGraph::new(&nodes, &edges).validate(), Ok(()));
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let nodes = vec![node("1", "LLM Chat"), node("1", "END")];
        assert_eq!(
            FlowGraph::new(&nodes, &[]).validate(),
            Err(GraphError::DuplicateNode("1".to_string()))
        );
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let nodes = vec![node("1", "LLM Chat")];
        let edges = vec![edge("1", "9")];
        assert!(matches!(
            FlowGraph::new(&nodes, &edges).validate(),
            Err(GraphError::DanglingEdge { node, .. }) if node == "9"
        ));
    }

    #[test]
    fn test_node_kind_from_data_or_type() {
        assert_eq!(node("a", "LLM Chat PDF").kind(), NodeKind::Document);
        assert_eq!(node("a", "LLM Antonim").kind(), NodeKind::Antonym);

        let tagged = FlowNode {
            node_type: "URL".to_string(),
            data: json!({}),
            ..node("b", "")
        };
        assert_eq!(tagged.kind(), NodeKind::Url);
    }

    #[test]
    fn test_numeric_fields_accept_strings() {
        let node = FlowNode {
            data: json!({ "chunkSize": "4000", "topK": 4, "chunkOverlap": "lots" }),
            ..node("a", "")
        };
        assert_eq!(node.data_u32("chunkSize"), Some(4000));
        assert_eq!(node.data_u32("topK"), Some(4));
        assert_eq!(node.data_u32("chunkOverlap"), None);
    }

    #[test]
    fn test_wire_format_uses_type_key() {
        let parsed: FlowNode = serde_json::from_value(json!({
            "id": "1",
            "type": "custom",
            "position": {"x": 1.5, "y": 2.0},
            "data": {"nodeType": "LLM Chat", "prompt": "Be brief"}
        }))
        .unwrap();
        assert_eq!(parsed.node_type, "custom");
        assert_eq!(parsed.prompt(), "Be brief");
    }
}
