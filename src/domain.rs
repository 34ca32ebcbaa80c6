//! Domain models for RM snapshots.
//!
//! This module contains the snapshot data structures, the tagged attribute
//! values they carry, external identifiers, and configuration.

mod config;
pub use config::Config;

/// External identifiers assigned by the RM tool.
pub mod identifier;
pub use identifier::RmId;

/// Snapshot model: modules, types and items.
pub mod snapshot;
pub use snapshot::{
    AttributeDefinition, EnumValue, EnumerationType, Item, Metadata, Module, NodeKind,
    RequirementType, Snapshot,
};

pub mod value;
pub use value::{AttributeKind, KindClass, PrimitiveKind, Value};
