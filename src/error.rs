use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Circular loop detected on resource group '{resource_group}'")]
    Cycle { resource_group: String },
    #[error("Transformer for resource group {resource_group_id} and attribute {attribute_definition_id} already exists")]
    DuplicateEdge {
        resource_group_id: i64,
        attribute_definition_id: i64,
    },
    #[error("Resource group {0} cannot consume from itself")]
    SelfConsumption(i64),
    #[error("Cannot delete {entity}: still referenced by {referenced_by}")]
    ReferentialIntegrity {
        entity: String,
        referenced_by: String,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid factor {0}: must be a finite number greater than zero")]
    InvalidFactor(f64),
    #[error("A factor only applies to a transformer that consumes from a parent")]
    FactorWithoutParent,
    #[error("Consumed total of transformer {transformer} exceeds the storable range")]
    TotalOverflow { transformer: i64 },
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
