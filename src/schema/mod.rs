//! Logical table metadata and the physical storage it describes.

pub mod physical;
pub mod registry;

pub use physical::PhysicalTableManager;
pub use registry::SchemaRegistry;
