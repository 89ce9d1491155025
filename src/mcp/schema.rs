//! JSON Schema helpers for MCP-compliant schemas.
//!
//! Generates standard JSON Schema without Rust-specific formats like "uint"
//! that LLMs may not understand correctly.

use schemars::Schema;
use schemars::json_schema;

/// Unsigned integer schema: `{"type": "integer", "minimum": 0}`
///
/// Use with `#[schemars(schema_with = "crate::mcp::schema::uint")]` on unsigned fields.
pub fn uint(_generator: &mut schemars::SchemaGenerator) -> Schema {
    json_schema!({
        "type": "integer",
        "minimum": 0
    })
}

/// Nullable variant of [`uint`] for `Option<u16>`/`Option<usize>` fields.
pub fn optional_uint(_generator: &mut schemars::SchemaGenerator) -> Schema {
    json_schema!({
        "type": ["integer", "null"],
        "minimum": 0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::{JsonSchema, SchemaGenerator};

    fn assert_no_uint<T: JsonSchema>() {
        let schema = SchemaGenerator::default().into_root_schema_for::<T>();
        let json_str = serde_json::to_string(&schema).expect("Failed to serialize schema");

        assert!(
            !json_str.contains("\"uint"),
            "{} schema should not contain 'uint' format: {}",
            T::schema_name(),
            json_str
        );
    }

    #[test]
    fn test_uint_schema_structure() {
        let mut generator = SchemaGenerator::default();
        let schema = uint(&mut generator);

        let json = serde_json::to_value(&schema).expect("Failed to serialize schema");

        assert_eq!(json.get("type"), Some(&serde_json::json!("integer")));
        assert_eq!(json.get("minimum"), Some(&serde_json::json!(0)));
        assert!(json.get("format").is_none(), "Should not have format field");
    }

    #[test]
    fn test_optional_uint_schema_allows_null() {
        let mut generator = SchemaGenerator::default();
        let json = serde_json::to_value(optional_uint(&mut generator))
            .expect("Failed to serialize schema");

        assert_eq!(
            json.get("type"),
            Some(&serde_json::json!(["integer", "null"]))
        );
        assert!(json.get("format").is_none(), "Should not have format field");
    }

    #[test]
    fn test_list_response_schemas_no_uint() {
        use crate::mcp::types::{
            ForwardingListResponse, HostListResponse, PortForwardingListResponse,
            TerminalListResponse,
        };

        assert_no_uint::<HostListResponse>();
        assert_no_uint::<PortForwardingListResponse>();
        assert_no_uint::<TerminalListResponse>();
        assert_no_uint::<ForwardingListResponse>();
    }

    #[test]
    fn test_terminal_output_schema_no_uint() {
        use crate::mcp::types::TerminalOutputResponse;

        assert_no_uint::<TerminalOutputResponse>();
    }

    #[test]
    fn test_shell_size_schema_no_uint() {
        use crate::types::ShellSize;

        assert_no_uint::<ShellSize>();
    }
}
