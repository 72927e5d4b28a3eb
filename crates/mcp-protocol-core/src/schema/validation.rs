//! Schema compilation and validation.
//!
//! The engine ships with an embedded MCP envelope schema
//! (`schema/mcp-schema.json`, compiled via [`jsonschema`]) so a caller gets
//! useful validation for free. An embedder may instead point
//! [`SchemaValidatorConfig::override_uri`] at a `file://` or `http(s)://`
//! document of their own; the override is only abandoned in favor of the
//! embedded document if the override source itself cannot be found — a
//! parse or compile failure in an override is never silently swallowed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use jsonschema::Validator;
use serde_json::Value;

use crate::error::McpError;
use crate::protocol::jsonrpc::Archetype;

const EMBEDDED_SCHEMA: &str = include_str!("../../schema/mcp-schema.json");

/// Where the compiled schema document comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    Embedded,
    File(PathBuf),
    Http(String),
}

fn parse_override_uri(uri: &str) -> Result<SchemaSource, McpError> {
    if let Some(path) = uri.strip_prefix("file://") {
        Ok(SchemaSource::File(PathBuf::from(path)))
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(SchemaSource::Http(uri.to_string()))
    } else {
        Err(McpError::invalid_params(format!(
            "unsupported schema override scheme in '{uri}'; expected file:// or http(s)://"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct SchemaValidatorConfig {
    pub override_uri: Option<String>,
    pub http_timeout: Duration,
}

impl Default for SchemaValidatorConfig {
    fn default() -> Self {
        Self {
            override_uri: None,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// One resolved validation failure, with enough detail for a caller to
/// surface a precise, actionable message. Distinct from the general
/// [`McpError`] taxonomy's client-data allow-list: every field here
/// describes the caller's own malformed message, so all of it is safe to
/// return to the client as-is via [`ValidationFailure::to_jsonrpc_error`].
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub instance_path: String,
    pub schema_path: String,
    pub message: String,
    pub data_preview: String,
    pub suggestion: String,
    pub causes: Vec<String>,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationFailure {}

impl ValidationFailure {
    pub fn to_jsonrpc_error(&self) -> crate::protocol::jsonrpc::JsonRpcError {
        let mut data = serde_json::Map::new();
        data.insert("instancePath".to_string(), Value::String(self.instance_path.clone()));
        data.insert("schemaPath".to_string(), Value::String(self.schema_path.clone()));
        data.insert("dataPreview".to_string(), Value::String(self.data_preview.clone()));
        data.insert("suggestion".to_string(), Value::String(self.suggestion.clone()));
        if !self.causes.is_empty() {
            data.insert(
                "validationCausesDetail".to_string(),
                Value::Array(self.causes.iter().cloned().map(Value::String).collect()),
            );
        }
        crate::protocol::jsonrpc::JsonRpcError::new(
            crate::error::error_codes::PROTOCOL_INVALID,
            self.message.clone(),
        )
        .with_data(Value::Object(data))
    }
}

impl From<ValidationFailure> for McpError {
    fn from(failure: ValidationFailure) -> Self {
        McpError::invalid_request(failure.message)
    }
}

struct Compiled {
    map: HashMap<String, Validator>,
    aliases: HashMap<&'static str, String>,
    version: String,
    source: SchemaSource,
}

struct Timings {
    load: Option<Duration>,
    compile: Option<Duration>,
}

/// Compiles and serves MCP envelope schemas. Not usable until
/// [`SchemaValidator::initialize`] has run.
pub struct SchemaValidator {
    config: SchemaValidatorConfig,
    http: reqwest::Client,
    compiled: RwLock<Option<Compiled>>,
    timings: RwLock<Timings>,
}

/// Generic alias table: archetype name -> ordered preference of definition
/// names to try when an exact key match isn't present in the compiled map.
/// The first target already present in the map wins.
const ALIAS_TABLE: &[(&str, &[&str])] = &[
    ("request", &["JSONRPCRequest", "Request"]),
    ("notification", &["JSONRPCNotification", "Notification"]),
    ("success_response", &["JSONRPCSuccessResponse", "Response"]),
    ("error_response", &["JSONRPCErrorResponse", "Error"]),
    (
        "ping_notification",
        &["PingRequest", "PingNotification", "JSONRPCNotification"],
    ),
    ("initialize_response", &["InitializeResult"]),
    ("tools/list_response", &["ListToolsResult"]),
    ("resources/list_response", &["ListResourcesResult"]),
    ("prompts/list_response", &["ListPromptsResult"]),
    ("CallToolResult", &["CallToolResult", "ToolResult"]),
];

impl SchemaValidator {
    pub fn new(config: SchemaValidatorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent("mcp-protocol-engine/schema-validator")
            .build()
            .expect("reqwest client construction");
        Self {
            config,
            http,
            compiled: RwLock::new(None),
            timings: RwLock::new(Timings {
                load: None,
                compile: None,
            }),
        }
    }

    fn is_initialized(&self) -> bool {
        self.compiled.read().expect("lock poisoned").is_some()
    }

    /// Load the source bytes, trying the override first if configured and
    /// falling back to the embedded document only when the override cannot
    /// be found (a file that doesn't exist, or an HTTP 404/connection
    /// failure) — any other override failure (parse, compile) is fatal.
    async fn load_source(&self) -> Result<(SchemaSource, String), McpError> {
        let load_start = Instant::now();

        let result = match &self.config.override_uri {
            None => Ok((SchemaSource::Embedded, EMBEDDED_SCHEMA.to_string())),
            Some(uri) => {
                let source = parse_override_uri(uri)?;
                match &source {
                    SchemaSource::File(path) => match tokio::fs::read_to_string(path).await {
                        Ok(body) => Ok((source, body)),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            tracing::warn!(
                                path = %path.display(),
                                "schema override file not found, falling back to embedded schema"
                            );
                            Ok((SchemaSource::Embedded, EMBEDDED_SCHEMA.to_string()))
                        }
                        Err(e) => Err(McpError::resource_invalid(format!(
                            "failed to read schema override file: {e}"
                        ))),
                    },
                    SchemaSource::Http(url) => match self.http.get(url).send().await {
                        Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                            tracing::warn!(
                                url,
                                "schema override URL returned 404, falling back to embedded schema"
                            );
                            Ok((SchemaSource::Embedded, EMBEDDED_SCHEMA.to_string()))
                        }
                        Ok(resp) => {
                            let status = resp.status();
                            let body = resp.text().await.map_err(|e| {
                                McpError::service_unavailable(format!("schema fetch body: {e}"))
                            })?;
                            if status.is_success() {
                                Ok((source, body))
                            } else {
                                Err(McpError::service_unavailable(format!(
                                    "schema override fetch returned status {status}"
                                )))
                            }
                        }
                        Err(e) if e.is_connect() || e.is_timeout() => {
                            tracing::warn!(
                                url,
                                error = %e,
                                "schema override unreachable, falling back to embedded schema"
                            );
                            Ok((SchemaSource::Embedded, EMBEDDED_SCHEMA.to_string()))
                        }
                        Err(e) => Err(McpError::service_unavailable(format!(
                            "schema override fetch failed: {e}"
                        ))),
                    },
                    SchemaSource::Embedded => unreachable!(),
                }
            }
        };

        self.timings.write().expect("lock poisoned").load = Some(load_start.elapsed());
        result
    }

    fn detect_version(doc: &Value) -> String {
        if let Some(schema) = doc.get("$schema").and_then(Value::as_str) {
            if schema.contains("2020-12") {
                return "2020-12".to_string();
            }
            return schema.to_string();
        }
        if let Some(version) = doc.get("version").and_then(Value::as_str) {
            return version.to_string();
        }
        if let Some(version) = doc
            .get("info")
            .and_then(|i| i.get("version"))
            .and_then(Value::as_str)
        {
            return version.to_string();
        }
        for key in ["$id", "title"] {
            if let Some(s) = doc.get(key).and_then(Value::as_str) {
                if let Some(date) = find_mcp_date(s) {
                    return date;
                }
            }
        }
        "[unknown]".to_string()
    }

    /// Parse, compile, and cache a schema document. Root compilation failure
    /// is fatal; individual `#/definitions/<Name>` compile failures are
    /// collected and the first one is returned as an error only after every
    /// definition has been attempted, so one bad definition doesn't hide
    /// problems in the others.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let (source, body) = self.load_source().await?;

        let doc: Value = serde_json::from_str(&body)
            .map_err(|e| McpError::parse(format!("schema document is not valid JSON: {e}")))?;
        let version = Self::detect_version(&doc);

        let compile_start = Instant::now();

        let mut map = HashMap::new();
        let root = Validator::new(&doc)
            .map_err(|e| McpError::resource_invalid(format!("root schema failed to compile: {e}")))?;
        map.insert("base".to_string(), root);

        let mut first_definition_error: Option<McpError> = None;
        if let Some(definitions) = doc.get("definitions").and_then(Value::as_object) {
            for (name, def) in definitions {
                match Validator::new(def) {
                    Ok(validator) => {
                        map.insert(name.clone(), validator);
                    }
                    Err(e) => {
                        tracing::warn!(definition = name, error = %e, "definition failed to compile");
                        if first_definition_error.is_none() {
                            first_definition_error = Some(McpError::resource_invalid(format!(
                                "definition '{name}' failed to compile: {e}"
                            )));
                        }
                    }
                }
            }
        }

        self.timings.write().expect("lock poisoned").compile = Some(compile_start.elapsed());

        if let Some(err) = first_definition_error {
            return Err(err);
        }

        let mut aliases = HashMap::new();
        for (alias, targets) in ALIAS_TABLE {
            if map.contains_key(*alias) {
                continue;
            }
            if let Some(target) = targets.iter().find(|t| map.contains_key(**t)) {
                aliases.insert(*alias, target.to_string());
            }
        }

        *self.compiled.write().expect("lock poisoned") = Some(Compiled {
            map,
            aliases,
            version,
            source,
        });

        Ok(())
    }

    /// Reduce an arbitrary `message_type` to one of the four canonical
    /// archetype aliases, the way the loaded schema names a message's shape
    /// rather than what a caller happens to label it:
    /// `_notification`/`notifications/` → notification; `Response`/`Result`/
    /// `_response` → response, discriminating error vs. success via an
    /// `Error` substring; anything else → request.
    fn archetype_bucket(message_type: &str) -> &'static str {
        let lower = message_type.to_ascii_lowercase();
        if lower.contains("_notification") || lower.contains("notifications/") {
            return "notification";
        }
        if message_type.contains("Response")
            || message_type.contains("Result")
            || lower.contains("_response")
        {
            return if message_type.contains("Error") {
                "error_response"
            } else {
                "success_response"
            };
        }
        "request"
    }

    fn resolve_key<'a>(compiled: &'a Compiled, message_type: &'a str) -> &'a str {
        if compiled.map.contains_key(message_type) {
            return message_type;
        }
        if let Some(alias) = compiled.aliases.get(message_type) {
            tracing::debug!(message_type, alias, "resolved schema key via alias table");
            return alias;
        }
        let bucket = Self::archetype_bucket(message_type);
        if compiled.map.contains_key(bucket) {
            tracing::debug!(message_type, bucket, "resolved schema key via suffix/prefix heuristic");
            return compiled
                .map
                .get_key_value(bucket)
                .map(|(k, _)| k.as_str())
                .expect("just checked contains_key");
        }
        if let Some(alias) = compiled.aliases.get(bucket) {
            tracing::debug!(message_type, bucket, alias, "resolved schema key via suffix/prefix heuristic");
            return alias;
        }
        tracing::debug!(message_type, "falling back to base schema key");
        "base"
    }

    /// Validate `bytes` as the named archetype (`"request"`, `"notification"`,
    /// `"success_response"`, `"error_response"`, or a specific definition name).
    ///
    /// Returns `Ok(Err(failure))` style via `Result<(), ValidationFailure>` —
    /// a validation failure is expected traffic, not an internal error; only
    /// "the validator itself is broken" (not initialized, bad UTF-8/JSON)
    /// goes through [`McpError`].
    pub async fn validate(
        &self,
        message_type: &str,
        bytes: &[u8],
    ) -> Result<Result<(), ValidationFailure>, McpError> {
        if !self.is_initialized() {
            return Err(McpError::internal("schema validator has not been initialized"));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| McpError::parse(format!("message bytes are not valid UTF-8: {e}")))?;
        let instance: Value = serde_json::from_str(text).map_err(|e| {
            let preview: String = bytes.iter().take(100).map(|b| *b as char).collect();
            McpError::parse(format!("invalid JSON ({e}); preview: {preview:?}"))
        })?;

        let guard = self.compiled.read().expect("lock poisoned");
        let compiled = guard.as_ref().expect("checked is_initialized above");
        let key = Self::resolve_key(compiled, message_type);
        let validator = compiled.map.get(key).expect("resolve_key returns a present key");

        let errors: Vec<_> = validator.iter_errors(&instance).collect();
        if errors.is_empty() {
            return Ok(Ok(()));
        }

        let first = &errors[0];
        let data_preview = {
            let s = serde_json::to_string(&instance).unwrap_or_default();
            s.chars().take(100).collect::<String>()
        };
        let causes = errors[1..].iter().map(|e| e.to_string()).collect();

        Ok(Err(ValidationFailure {
            instance_path: first.instance_path.to_string(),
            schema_path: first.schema_path.to_string(),
            message: first.to_string(),
            data_preview,
            suggestion: synthesize_suggestion(first),
            causes,
        }))
    }

    pub async fn shutdown(&self) {
        *self.compiled.write().expect("lock poisoned") = None;
        let mut timings = self.timings.write().expect("lock poisoned");
        timings.load = None;
        timings.compile = None;
    }

    pub fn load_duration(&self) -> Option<Duration> {
        self.timings.read().expect("lock poisoned").load
    }

    pub fn compile_duration(&self) -> Option<Duration> {
        self.timings.read().expect("lock poisoned").compile
    }

    pub fn detected_version(&self) -> Option<String> {
        self.compiled
            .read()
            .expect("lock poisoned")
            .as_ref()
            .map(|c| c.version.clone())
    }

    pub fn source(&self) -> Option<SchemaSource> {
        self.compiled
            .read()
            .expect("lock poisoned")
            .as_ref()
            .map(|c| c.source.clone())
    }
}

fn find_mcp_date(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    for i in 0..bytes.len().saturating_sub(9) {
        let candidate = &bytes[i..i + 10];
        let ok = candidate[0..4].iter().all(u8::is_ascii_digit)
            && candidate[4] == b'-'
            && candidate[5..7].iter().all(u8::is_ascii_digit)
            && candidate[7] == b'-'
            && candidate[8..10].iter().all(u8::is_ascii_digit);
        if ok {
            return Some(String::from_utf8_lossy(candidate).into_owned());
        }
    }
    None
}

fn synthesize_suggestion(error: &jsonschema::ValidationError<'_>) -> String {
    format!(
        "check the value at '{}' against schema location '{}'",
        error.instance_path, error.schema_path
    )
}

impl From<Archetype> for &'static str {
    fn from(archetype: Archetype) -> Self {
        match archetype {
            Archetype::Request => "request",
            Archetype::Notification => "notification",
            Archetype::SuccessResponse => "success_response",
            Archetype::ErrorResponse => "error_response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedded_schema_validates_a_request() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();
        let body = serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 1});
        let result = validator
            .validate("request", body.to_string().as_bytes())
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn embedded_schema_rejects_a_non_string_method() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();
        let body = serde_json::json!({"jsonrpc": "2.0", "method": 7, "id": 1});
        let failure = validator
            .validate("request", body.to_string().as_bytes())
            .await
            .unwrap()
            .unwrap_err();
        assert!(!failure.instance_path.is_empty() || !failure.schema_path.is_empty());
    }

    #[tokio::test]
    async fn not_initialized_is_rejected() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        let err = validator.validate("request", b"{}").await.unwrap_err();
        assert!(matches!(err, McpError::Internal(_)));
    }

    #[tokio::test]
    async fn success_response_alias_resolves() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();
        let body = serde_json::json!({"jsonrpc": "2.0", "result": {}, "id": 1});
        let result = validator
            .validate("success_response", body.to_string().as_bytes())
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn error_response_alias_resolves() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "error": { "code": -32601, "message": "nope" },
            "id": 1
        });
        let result = validator
            .validate("error_response", body.to_string().as_bytes())
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn archetype_bucket_classifies_by_suffix() {
        assert_eq!(
            SchemaValidator::archetype_bucket("notifications/initialized"),
            "notification"
        );
        assert_eq!(
            SchemaValidator::archetype_bucket("ping_notification"),
            "notification"
        );
        assert_eq!(
            SchemaValidator::archetype_bucket("tools/list_response"),
            "success_response"
        );
        assert_eq!(
            SchemaValidator::archetype_bucket("JSONRPCErrorResponse"),
            "error_response"
        );
        assert_eq!(SchemaValidator::archetype_bucket("tools/call"), "request");
    }

    #[tokio::test]
    async fn unknown_message_type_falls_back_through_the_heuristic_bucket() {
        let validator = SchemaValidator::new(SchemaValidatorConfig::default());
        validator.initialize().await.unwrap();
        let body = serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 1});
        let result = validator
            .validate("tools/list_request", body.to_string().as_bytes())
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_override_file_falls_back_to_embedded() {
        let config = SchemaValidatorConfig {
            override_uri: Some("file:///nonexistent/schema.json".to_string()),
            ..Default::default()
        };
        let validator = SchemaValidator::new(config);
        validator.initialize().await.unwrap();
        assert!(matches!(validator.source(), Some(SchemaSource::Embedded)));
    }

    #[tokio::test]
    async fn override_file_is_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        tokio::fs::write(&path, EMBEDDED_SCHEMA).await.unwrap();

        let config = SchemaValidatorConfig {
            override_uri: Some(format!("file://{}", path.display())),
            ..Default::default()
        };
        let validator = SchemaValidator::new(config);
        validator.initialize().await.unwrap();
        assert!(matches!(validator.source(), Some(SchemaSource::File(_))));
    }

    #[tokio::test]
    async fn malformed_override_json_is_fatal_not_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let config = SchemaValidatorConfig {
            override_uri: Some(format!("file://{}", path.display())),
            ..Default::default()
        };
        let validator = SchemaValidator::new(config);
        assert!(validator.initialize().await.is_err());
    }
}
