//! Resource flow accounting
//!
//! Tracks numeric attributes (CPU, RAM, licenses, ...) carried by the
//! resources of named groups. A transformer couples a group with one
//! attribute and may consume from another group's attribute, scaled by a
//! factor. Produced totals are aggregated from resource values; consumed
//! totals are aggregated from the children drawing on a transformer.

pub mod db;
pub mod error;
pub mod graph;
pub mod models;
pub mod propagation;
pub mod threshold;
pub mod tracker;

pub use error::{FlowError, Result};
pub use graph::{CycleDetected, TransformerGraph};
pub use models::{
    AttributeDefinition, NodeKey, Resource, ResourceAttribute, ResourceGroup, Transformer,
};
pub use threshold::{Percentage, Status};
pub use tracker::Tracker;
