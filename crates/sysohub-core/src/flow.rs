//! Typed flow-engine wiring
//!
//! The flow engine reads its graph from a JSON array of nodes. [`FlowGraphSpec`]
//! models the subset of node types the gateway wires up and checks that every
//! wire and broker reference resolves before anything is written.

use std::collections::HashSet;

use serde_json::{Map, Value, json};

use crate::error::CoreError;

/// Node behaviour and its type-specific fields
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Shared broker connection (config node, not placed on the tab)
    MqttBroker {
        host: String,
        port: u16,
        client_id: String,
        username: String,
        password: String,
    },
    /// Subscribe to a topic through the broker node with id `broker`
    MqttIn {
        topic: String,
        broker: String,
    },
    /// Parse `msg.payload` into an object
    Json,
    /// JavaScript function body
    Function { code: String },
    HttpRequest {
        method: String,
        url: String,
    },
    Debug,
}

impl NodeKind {
    fn type_name(&self) -> &'static str {
        match self {
            NodeKind::MqttBroker { .. } => "mqtt-broker",
            NodeKind::MqttIn { .. } => "mqtt in",
            NodeKind::Json => "json",
            NodeKind::Function { .. } => "function",
            NodeKind::HttpRequest { .. } => "http request",
            NodeKind::Debug => "debug",
        }
    }

    fn is_config_node(&self) -> bool {
        matches!(self, NodeKind::MqttBroker { .. })
    }
}

/// One node in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct FlowNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Ids of nodes receiving this node's output
    pub wires: Vec<String>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            wires: Vec::new(),
        }
    }

    #[must_use]
    pub fn wire_to(mut self, target: impl Into<String>) -> Self {
        self.wires.push(target.into());
        self
    }
}

/// A single tab of wired nodes
#[derive(Debug, Clone, PartialEq)]
pub struct FlowGraphSpec {
    pub tab_id: String,
    pub label: String,
    pub nodes: Vec<FlowNode>,
}

impl FlowGraphSpec {
    pub fn new(tab_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            tab_id: tab_id.into(),
            label: label.into(),
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn node(mut self, node: FlowNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Check ids are unique and all references resolve
    ///
    /// # Errors
    /// Returns `ConfigInvalid` naming the first broken reference.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut ids = HashSet::from([self.tab_id.as_str()]);
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(CoreError::ConfigInvalid(format!(
                    "duplicate flow node id {}",
                    node.id
                )));
            }
        }

        for node in &self.nodes {
            for target in &node.wires {
                let resolves = self
                    .nodes
                    .iter()
                    .any(|n| &n.id == target && !n.kind.is_config_node());
                if !resolves {
                    return Err(CoreError::ConfigInvalid(format!(
                        "node {} is wired to unknown node {target}",
                        node.id
                    )));
                }
            }
            if let NodeKind::MqttIn { broker, .. } = &node.kind {
                let resolves = self
                    .nodes
                    .iter()
                    .any(|n| &n.id == broker && matches!(n.kind, NodeKind::MqttBroker { .. }));
                if !resolves {
                    return Err(CoreError::ConfigInvalid(format!(
                        "node {} references missing broker {broker}",
                        node.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn node_json(&self, node: &FlowNode, position: usize) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), json!(node.id));
        obj.insert("type".into(), json!(node.kind.type_name()));
        obj.insert("name".into(), json!(node.name));

        match &node.kind {
            NodeKind::MqttBroker {
                host,
                port,
                client_id,
                username,
                password,
            } => {
                obj.insert("broker".into(), json!(host));
                obj.insert("port".into(), json!(port.to_string()));
                obj.insert("clientid".into(), json!(client_id));
                obj.insert("protocolVersion".into(), json!("4"));
                obj.insert("keepalive".into(), json!("60"));
                obj.insert("cleansession".into(), json!(true));
                obj.insert(
                    "credentials".into(),
                    json!({"user": username, "password": password}),
                );
                return Value::Object(obj);
            }
            NodeKind::MqttIn { topic, broker } => {
                obj.insert("topic".into(), json!(topic));
                obj.insert("qos".into(), json!("1"));
                obj.insert("datatype".into(), json!("auto-detect"));
                obj.insert("broker".into(), json!(broker));
            }
            NodeKind::Json => {
                obj.insert("property".into(), json!("payload"));
                obj.insert("action".into(), json!("obj"));
            }
            NodeKind::Function { code } => {
                obj.insert("func".into(), json!(code));
                obj.insert("outputs".into(), json!(1));
            }
            NodeKind::HttpRequest { method, url } => {
                obj.insert("method".into(), json!(method));
                obj.insert("url".into(), json!(url));
                obj.insert("ret".into(), json!("txt"));
            }
            NodeKind::Debug => {
                obj.insert("active".into(), json!(true));
                obj.insert("complete".into(), json!("true"));
            }
        }

        obj.insert("z".into(), json!(self.tab_id));
        // lay nodes out left to right in declaration order
        let x = 160 + 200 * position;
        obj.insert("x".into(), json!(x));
        obj.insert("y".into(), json!(120));
        obj.insert("wires".into(), json!([node.wires]));
        Value::Object(obj)
    }

    /// Serialize to the flow engine's JSON document
    ///
    /// # Errors
    /// Propagates [`FlowGraphSpec::validate`] failures.
    pub fn render(&self) -> Result<String, CoreError> {
        self.validate()?;

        let mut doc = vec![json!({
            "id": self.tab_id,
            "type": "tab",
            "label": self.label,
            "disabled": false,
        })];
        let mut position = 0;
        for node in &self.nodes {
            doc.push(self.node_json(node, position));
            if !node.kind.is_config_node() {
                position += 1;
            }
        }

        let mut text = serde_json::to_string_pretty(&Value::Array(doc))
            .map_err(|e| CoreError::ConfigInvalid(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> FlowNode {
        FlowNode::new(
            "broker",
            "local",
            NodeKind::MqttBroker {
                host: "localhost".into(),
                port: 1883,
                client_id: "node-red".into(),
                username: "u".into(),
                password: "p".into(),
            },
        )
    }

    fn graph() -> FlowGraphSpec {
        FlowGraphSpec::new("tab", "Telemetry")
            .node(broker())
            .node(
                FlowNode::new(
                    "in",
                    "sensors",
                    NodeKind::MqttIn {
                        topic: "t".into(),
                        broker: "broker".into(),
                    },
                )
                .wire_to("parse"),
            )
            .node(FlowNode::new("parse", "parse", NodeKind::Json))
    }

    #[test]
    fn test_render_places_nodes_on_tab() {
        let text = graph().render().unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        let nodes = doc.as_array().unwrap();

        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0]["type"], "tab");
        assert_eq!(nodes[1]["type"], "mqtt-broker");
        assert!(nodes[1].get("z").is_none());
        assert_eq!(nodes[2]["z"], "tab");
        assert_eq!(nodes[2]["wires"], json!([["parse"]]));
        assert_eq!(nodes[3]["x"], 360);
    }

    #[test]
    fn test_dangling_wire_rejected() {
        let spec = graph().node(FlowNode::new("dbg", "dbg", NodeKind::Debug).wire_to("nowhere"));
        assert!(matches!(spec.validate(), Err(CoreError::ConfigInvalid(_))));
    }

    #[test]
    fn test_missing_broker_rejected() {
        let spec = FlowGraphSpec::new("tab", "t").node(FlowNode::new(
            "in",
            "in",
            NodeKind::MqttIn {
                topic: "t".into(),
                broker: "gone".into(),
            },
        ));
        assert!(spec.render().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let spec = graph().node(FlowNode::new("parse", "again", NodeKind::Debug));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(graph().render().unwrap(), graph().render().unwrap());
    }
}
