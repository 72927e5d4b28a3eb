use serde_json::json;

use mcp_protocol_core::*;

#[cfg(test)]
mod jsonrpc_tests {
    use super::*;

    #[test]
    fn test_jsonrpc_request_creation() {
        let request = JsonRpcRequest::new(
            "test_method".to_string(),
            Some(json!({"param": "value"})),
            Some(RequestId::String("test-123".to_string())),
        );

        assert_eq!(request.method, "test_method");
        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.id, Some(RequestId::String("test-123".to_string())));
    }

    #[test]
    fn test_jsonrpc_response_success() {
        let response = JsonRpcResponse::success(
            json!({"result": "ok"}),
            Some(RequestId::String("test-456".to_string())),
        );

        assert!(response.result.is_some());
        assert!(response.error.is_none());
        assert_eq!(response.id, Some(RequestId::String("test-456".to_string())));
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let error = JsonRpcError::new(error::error_codes::METHOD_NOT_FOUND, "Method not found");
        let response = JsonRpcResponse::error(error, Some(RequestId::String("test-789".to_string())));

        assert!(response.result.is_none());
        assert!(response.error.is_some());
        assert_eq!(response.id, Some(RequestId::String("test-789".to_string())));
    }

    #[test]
    fn test_request_id_is_never_coerced() {
        let numeric = RequestId::number(7);
        let stringy = RequestId::String("7".to_string());
        assert_ne!(numeric, stringy);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    fn init_request() -> InitializeRequest {
        InitializeRequest {
            protocol_version: "2025-06-18".to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "test-client".to_string(),
                version: "1.0.0".to_string(),
                description: None,
            },
        }
    }

    #[test]
    fn test_lifecycle_initialization_payload() {
        let init_request = init_request();
        assert_eq!(init_request.protocol_version, "2025-06-18");
        assert_eq!(init_request.client_info.name, "test-client");
    }

    #[test]
    fn test_protocol_version_shape_is_validated() {
        assert!(init_request().validate_protocol_version().is_ok());

        let malformed = InitializeRequest {
            protocol_version: "not-a-date".to_string(),
            ..init_request()
        };
        assert!(malformed.validate_protocol_version().is_err());
    }

    #[test]
    fn test_fresh_fsm_starts_uninitialized() {
        let fsm = LifecycleFsm::new();
        assert_eq!(fsm.current_state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_full_handshake_reaches_initialized() {
        let fsm = LifecycleFsm::new();
        fsm.validate_method("initialize", false).unwrap();
        fsm.advance("initialize", false);
        assert_eq!(fsm.current_state(), LifecycleState::Initializing);

        fsm.validate_method("notifications/initialized", true).unwrap();
        fsm.advance("notifications/initialized", true);
        assert_eq!(fsm.current_state(), LifecycleState::Initialized);

        fsm.validate_method("tools/list", false).unwrap();
    }

    #[test]
    fn test_generic_request_before_initialize_is_rejected() {
        let fsm = LifecycleFsm::new();
        let err = fsm.validate_method("tools/list", false).unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
    }

    #[test]
    fn test_capability_negotiation_defaults() {
        let server_caps = ServerCapabilities::default();
        let client_caps = ClientCapabilities::default();

        assert!(server_caps.tools.is_none());
        assert!(client_caps.roots.is_none());
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;
    use error::error_codes;

    #[test]
    fn test_invalid_request_maps_to_protocol_band() {
        let error = McpError::invalid_request("missing required field");
        assert!(matches!(error, McpError::Protocol(_)));
        assert_eq!(error::to_jsonrpc_error(&error).code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_method_not_found_error() {
        let error = McpError::method_not_found("unknown_method");
        assert_eq!(
            error::to_jsonrpc_error(&error).code,
            error_codes::METHOD_NOT_FOUND
        );
    }

    #[test]
    fn test_request_sequence_error_carries_state_context() {
        let error = McpError::request_sequence("tools/list", LifecycleState::Uninitialized);
        let projection = error::to_jsonrpc_error(&error);
        assert_eq!(projection.code, error_codes::PROTOCOL_REQUEST_SEQUENCE);
        assert!(projection.data.is_some());
    }

    #[test]
    fn test_result_error_handling() {
        let result: McpResult<String> = Err(McpError::internal("boom"));
        assert!(result.is_err());
    }

    #[test]
    fn test_result_success() {
        let result: McpResult<String> = Ok("success".to_string());
        assert_eq!(result.unwrap(), "success");
    }
}

#[cfg(test)]
mod schema_tests {
    use super::*;

    #[tokio::test]
    async fn test_embedded_schema_accepts_a_well_formed_request() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();

        let bytes = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {}
        }))
        .unwrap();

        let outcome = validator.validate("request", &bytes).await.unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_embedded_schema_rejects_a_non_string_method() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();

        let bytes = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": 123
        }))
        .unwrap();

        let outcome = validator.validate("request", &bytes).await.unwrap();
        let failure = outcome.expect_err("a numeric method must fail schema validation");
        let wire_error = failure.to_jsonrpc_error();
        assert_eq!(wire_error.code, error::error_codes::PROTOCOL_INVALID);
    }
}
