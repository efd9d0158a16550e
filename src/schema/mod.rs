//! Schema registry, field model, and DDL translation.

pub mod fields;
pub mod registry;
pub mod translate;

pub use fields::SchemaField;
pub use registry::{SchemaMetadata, SchemaRecord, SchemaRegistry};
pub use translate::EngineDialect;
