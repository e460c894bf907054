//! Hierarchical correlation context and its execution-unit-local store

mod context;
mod manager;

pub use context::{
    CorrelationContext, CorrelationSnapshot, INHERITED_FROM_KEY, OPERATION_KEY, SYNTHESIZED_KEY,
};
pub use manager::CorrelationManager;
