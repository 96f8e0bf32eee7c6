//! Runtime schemas: declaration types, type conversion, conditional rules,
//! registered-kind ancestry, schema storage, and validated schema updates.

pub mod conditional;
pub mod conversions;
pub mod registry;
pub mod schema_update;
pub mod store;
pub mod types;
