//! The per-connection message pipeline.
//!
//! A receive → dispatch → send loop with a `tokio::time::timeout` around the
//! handler call and a timeout error response on expiry, generalized into a
//! decode → validate → gate → route → encode pipeline so an embedder
//! registers methods on a `Router` instead of editing a hardcoded
//! business-method `match`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mcp_protocol_core::{
    ClientCapabilities, InitializeRequest, InitializeResponse, JsonRpcError, JsonRpcMessage,
    JsonRpcResponse, LifecycleFsm, LifecycleState, McpError, RequestId, SchemaValidator,
};

use crate::router::Router;
use crate::transport::Transport;

/// Protocol version and client capabilities cached once `initialize`
/// succeeds, so later handlers can read what was negotiated without
/// re-parsing the original request.
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    pub protocol_version: String,
    pub client_capabilities: ClientCapabilities,
}

/// The three non-schema entries of the pipeline's configuration surface.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            debug: false,
        }
    }
}

/// One connection's worth of long-lived state: its own lifecycle FSM (every
/// connection negotiates independently), a shared router and validator, and
/// a cancellation token that gates every in-flight handler future once
/// shutdown begins.
pub struct Connection {
    pub id: Uuid,
    pub lifecycle: Arc<LifecycleFsm>,
    pub router: Arc<Router>,
    pub validator: Arc<SchemaValidator>,
    pub cancel: CancellationToken,
    config: PipelineConfig,
    negotiated: RwLock<Option<NegotiatedSession>>,
}

impl Connection {
    pub fn new(router: Arc<Router>, validator: Arc<SchemaValidator>, config: PipelineConfig) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            lifecycle: LifecycleFsm::new(),
            router,
            validator,
            cancel: CancellationToken::new(),
            config,
            negotiated: RwLock::new(None),
        })
    }

    pub async fn negotiated(&self) -> Option<NegotiatedSession> {
        self.negotiated.read().await.clone()
    }

    fn encode_success(&self, result: Value, id: Option<RequestId>) -> Vec<u8> {
        let response = JsonRpcResponse::success(result, id);
        serde_json::to_vec(&response).expect("JsonRpcResponse always serializes")
    }

    fn encode_error(&self, err: McpError, id: Option<RequestId>) -> Vec<u8> {
        tracing::error!(connection = %self.id, error = %err, "request failed");
        let response = JsonRpcResponse::error(JsonRpcError::from_mcp_error(&err), id);
        serde_json::to_vec(&response).expect("JsonRpcResponse always serializes")
    }

    /// Drive one inbound message through the seven-step pipeline:
    ///
    /// 1. envelope parse — malformed JSON or a root-level array produces a
    ///    client-visible error with `id: null`
    /// 2. schema pre-validation against the request/notification archetype
    /// 3. lifecycle gate (`LifecycleFsm::validate_method`)
    /// 4. lifecycle advance (benign no-op on `NoTransition`, since the gate
    ///    already confirmed reachability)
    /// 5. dispatch through the router
    /// 6. response encoding — notifications never produce bytes, even when
    ///    their handler errors; the failure is logged instead
    /// 7. deadline enforcement around the whole dispatch
    pub async fn handle_one(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        let raw: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                return Some(self.encode_error(McpError::parse(format!("malformed JSON: {e}")), None));
            }
        };
        if raw.is_array() {
            return Some(self.encode_error(
                McpError::invalid_request("batch requests are not supported"),
                None,
            ));
        }

        // An absent or explicitly-`null` `id` is a notification, matching
        // `JsonRpcRequest::is_notification` after typed deserialization — the
        // two must agree, since the archetype chosen here picks the schema
        // the message is validated against below.
        let raw_id = raw
            .get("id")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());
        let is_notification = raw.get("id").map_or(true, |v| v.is_null());

        // Schema pre-validation runs on the untyped wire bytes so a failure
        // like a non-string `method` is reported with the validator's own
        // instance/schema path, rather than surfacing as an opaque serde
        // deserialization error once typed extraction is attempted below.
        let archetype_key = if is_notification { "notification" } else { "request" };
        match self.validator.validate(archetype_key, bytes).await {
            Err(validator_broken) => {
                return Some(self.encode_error(validator_broken, raw_id));
            }
            Ok(Err(failure)) => {
                tracing::warn!(connection = %self.id, %failure, "schema validation failed");
                if is_notification {
                    return None;
                }
                let response = JsonRpcResponse::error(failure.to_jsonrpc_error(), raw_id);
                return Some(serde_json::to_vec(&response).expect("always serializes"));
            }
            Ok(Ok(())) => {}
        }

        let message: JsonRpcMessage = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                return Some(self.encode_error(
                    McpError::invalid_request(format!("malformed envelope: {e}")),
                    raw_id,
                ));
            }
        };

        let request = match message {
            JsonRpcMessage::Request(req) => req,
            JsonRpcMessage::Notification(req) => req,
            JsonRpcMessage::Response(resp) => {
                return Some(self.encode_error(
                    McpError::invalid_request("received an unexpected response message"),
                    resp.id,
                ));
            }
        };

        let id = request.id.clone();
        let method = request.method.clone();

        if let Err(sequence_err) = self.lifecycle.validate_method(&method, is_notification) {
            if is_notification {
                tracing::warn!(connection = %self.id, method, "notification rejected out of sequence");
                return None;
            }
            return Some(self.encode_error(sequence_err, id));
        }

        self.lifecycle.advance(&method, is_notification);

        let params = request.params.clone();
        let dispatch = self.router.route(&method, params.clone(), is_notification);
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.config.request_timeout, dispatch) => result,
            _ = self.cancel.cancelled() => {
                tracing::warn!(connection = %self.id, method, "handler canceled by shutdown");
                return None;
            }
        };

        let (value, err) = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(connection = %self.id, method, "request timed out");
                if is_notification {
                    return None;
                }
                return Some(self.encode_error(McpError::internal("request timeout"), id));
            }
        };

        if method == "initialize" && err.is_none() {
            self.record_negotiated(&params, value.as_ref()).await;
        }

        if is_notification {
            if let Some(e) = err {
                tracing::warn!(connection = %self.id, method, error = %e, "notification handler failed");
            }
            None
        } else {
            match err {
                Some(e) => Some(self.encode_error(e, id)),
                None => Some(self.encode_success(value.unwrap_or(Value::Null), id)),
            }
        }
    }

    async fn record_negotiated(&self, params: &Option<Value>, result: Option<&Value>) {
        let Some(params) = params else { return };
        let Ok(init_request) = serde_json::from_value::<InitializeRequest>(params.clone()) else {
            return;
        };
        let protocol_version = result
            .and_then(|v| serde_json::from_value::<InitializeResponse>(v.clone()).ok())
            .map(|r| r.protocol_version)
            .unwrap_or(init_request.protocol_version);

        *self.negotiated.write().await = Some(NegotiatedSession {
            protocol_version,
            client_capabilities: init_request.capabilities,
        });
    }

    /// Begin a graceful shutdown: in-flight handler futures observe
    /// `cancel`, and `run`'s loop exits once the lifecycle reaches
    /// `Shutdown` or `shutdown_timeout` elapses, whichever comes first.
    pub fn begin_shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.config.shutdown_timeout
    }
}

/// Run the cooperative receive → `handle_one` → send loop for one
/// connection until the transport closes or the lifecycle reaches
/// `Shutdown`.
pub async fn run(connection: Arc<Connection>, mut transport: impl Transport) {
    loop {
        if connection.lifecycle.current_state() == LifecycleState::Shutdown {
            let _ = transport.close().await;
            return;
        }

        let received = tokio::select! {
            received = transport.receive_message() => received,
            _ = connection.cancel.cancelled() => {
                let _ = tokio::time::timeout(connection.shutdown_timeout(), transport.close()).await;
                return;
            }
        };

        let message = match received {
            Ok(message) => message,
            Err(_) => {
                let _ = transport.close().await;
                return;
            }
        };

        let bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };

        if let Some(response_bytes) = connection.handle_one(&bytes).await {
            match serde_json::from_slice::<JsonRpcMessage>(&response_bytes) {
                Ok(response_message) => {
                    if transport.send_message(response_message).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(connection = %connection.id, error = %e, "failed to re-decode pipeline response");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Route, RouterBuilder};
    use crate::transport::duplex_pair;
    use mcp_protocol_core::{JsonRpcRequest, SchemaValidatorConfig};

    async fn test_connection() -> Arc<Connection> {
        let router = RouterBuilder::new()
            .add_route(Route::for_request(
                "initialize",
                Arc::new(|_params| {
                    Box::pin(async {
                        Ok(serde_json::json!({
                            "protocolVersion": "2025-06-18",
                            "capabilities": {},
                            "serverInfo": {"name": "test", "version": "0.1.0"}
                        }))
                    })
                }),
            ))
            .unwrap()
            .add_route(Route::for_notification(
                "notifications/initialized",
                Arc::new(|_params| Box::pin(async { Ok(()) })),
            ))
            .unwrap()
            .add_route(Route::for_request(
                "tools/list",
                Arc::new(|_params| Box::pin(async { Ok(serde_json::json!({"tools": []})) })),
            ))
            .unwrap()
            .build();

        let validator = Arc::new(SchemaValidator::new(SchemaValidatorConfig::default()));
        validator.initialize().await.unwrap();

        Connection::new(Arc::new(router), validator, PipelineConfig::default())
    }

    fn encode(request: &JsonRpcRequest) -> Vec<u8> {
        serde_json::to_vec(request).unwrap()
    }

    #[tokio::test]
    async fn happy_handshake_then_generic_request() {
        let connection = test_connection().await;

        let init = JsonRpcRequest::new(
            "initialize".to_string(),
            Some(serde_json::json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "client", "version": "1.0"}
            })),
            Some(RequestId::number(1)),
        );
        let response_bytes = connection.handle_one(&encode(&init)).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert!(response.error.is_none());
        assert!(connection.negotiated().await.is_some());

        let initialized = JsonRpcRequest::new("notifications/initialized".to_string(), None, None);
        assert!(connection.handle_one(&encode(&initialized)).await.is_none());

        let list = JsonRpcRequest::new("tools/list".to_string(), None, Some(RequestId::number(2)));
        let response_bytes = connection.handle_one(&encode(&list)).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap(), serde_json::json!({"tools": []}));
    }

    #[tokio::test]
    async fn out_of_sequence_request_is_rejected() {
        let connection = test_connection().await;
        let list = JsonRpcRequest::new("tools/list".to_string(), None, Some(RequestId::number(1)));
        let response_bytes = connection.handle_one(&encode(&list)).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert!(response.error.is_some());
        assert_eq!(
            response.error.unwrap().code,
            mcp_protocol_core::error::error_codes::PROTOCOL_REQUEST_SEQUENCE
        );
    }

    #[tokio::test]
    async fn unknown_method_after_init_is_method_not_found() {
        let connection = test_connection().await;
        let init = JsonRpcRequest::new(
            "initialize".to_string(),
            Some(serde_json::json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "client", "version": "1.0"}
            })),
            Some(RequestId::number(1)),
        );
        connection.handle_one(&encode(&init)).await;
        let initialized = JsonRpcRequest::new("notifications/initialized".to_string(), None, None);
        connection.handle_one(&encode(&initialized)).await;

        let unknown = JsonRpcRequest::new("totally/unknown".to_string(), None, Some(RequestId::number(3)));
        let response_bytes = connection.handle_one(&encode(&unknown)).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert_eq!(
            response.error.unwrap().code,
            mcp_protocol_core::error::error_codes::METHOD_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error_with_null_id() {
        let connection = test_connection().await;
        let response_bytes = connection.handle_one(b"{ not json").await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert!(response.id.is_none());
        assert_eq!(
            response.error.unwrap().code,
            mcp_protocol_core::error::error_codes::PARSE_ERROR
        );
    }

    #[tokio::test]
    async fn non_string_method_fails_schema_validation_with_id_echoed() {
        let connection = test_connection().await;
        let bytes = serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": 123})
            .to_string()
            .into_bytes();
        let response_bytes = connection.handle_one(&bytes).await.unwrap();
        let response: JsonRpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert_eq!(response.id, Some(RequestId::number(7)));
        assert_eq!(
            response.error.unwrap().code,
            mcp_protocol_core::error::error_codes::PROTOCOL_INVALID
        );
    }

    #[tokio::test]
    async fn run_loop_serves_a_duplex_transport_end_to_end() {
        let connection = test_connection().await;
        let (mut client, server) = duplex_pair();

        let server_task = tokio::spawn(run(connection.clone(), server));

        let init = JsonRpcRequest::new(
            "initialize".to_string(),
            Some(serde_json::json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "client", "version": "1.0"}
            })),
            Some(RequestId::number(1)),
        );
        client
            .send_message(JsonRpcMessage::Request(init))
            .await
            .unwrap();
        let response = client.receive_message().await.unwrap();
        match response {
            JsonRpcMessage::Response(r) => assert!(r.error.is_none()),
            other => panic!("expected a response, got {other:?}"),
        }

        connection.begin_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), server_task).await;
    }
}
