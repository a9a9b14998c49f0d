//! Data models for resource groups, resources and transformers

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: i64,
    pub name: String,
    pub resource_group_id: i64,
}

/// One attribute value carried by a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAttribute {
    pub resource_id: i64,
    pub attribute_definition_id: i64,
    pub attribute_name: String,
    pub value: u64,
}

/// Identity of a transformer node: which group produces which attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub resource_group_id: i64,
    pub attribute_definition_id: i64,
}

impl NodeKey {
    pub fn new(resource_group_id: i64, attribute_definition_id: i64) -> Self {
        Self {
            resource_group_id,
            attribute_definition_id,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.resource_group_id, self.attribute_definition_id)
    }
}

pub const DEFAULT_YELLOW_THRESHOLD: i64 = 80;
pub const DEFAULT_RED_THRESHOLD: i64 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct Transformer {
    pub id: i64,
    pub key: NodeKey,
    /// The parent this node draws from; `None` for a root producer
    pub consume_from: Option<NodeKey>,
    pub factor: Option<f64>, // Divisor applied to total_produced when pushed to the parent
    pub total_produced: u64,
    pub total_consumed: u64,
    pub yellow_threshold_percent_consumed: i64,
    pub red_threshold_percent_consumed: i64,
}

impl Transformer {
    /// A fresh, not yet persisted node (id 0) with default thresholds.
    pub fn new(key: NodeKey, consume_from: Option<NodeKey>, factor: Option<f64>) -> Self {
        Self {
            id: 0,
            key,
            consume_from,
            factor,
            total_produced: 0,
            total_consumed: 0,
            yellow_threshold_percent_consumed: DEFAULT_YELLOW_THRESHOLD,
            red_threshold_percent_consumed: DEFAULT_RED_THRESHOLD,
        }
    }

    /// Share of this node's production counted against its parent
    pub fn consumed_share(&self) -> f64 {
        self.total_produced as f64 / self.factor.unwrap_or(1.0)
    }
}
