//! Draft 2020-12 JSON Schema compilation and validation for MCP message
//! archetypes (`request`, `notification`, `response`), with an embedded
//! fallback schema and an optional override loaded from a `file://` or
//! `http(s)://` URI.

pub mod validation;

pub use validation::{SchemaSource, SchemaValidator, SchemaValidatorConfig, ValidationFailure};
