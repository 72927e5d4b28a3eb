//! Method routing.
//!
//! Grounded on the teacher's `match request.method.as_str() { ... }` block
//! in `server.rs`, but inverted into data: a [`Router`] is a registered
//! table of [`Route`]s built once during startup (via [`RouterBuilder`]) and
//! then frozen — `add_route` only exists on the builder, matching the
//! "mutated only during registration" lifecycle a connection pipeline
//! expects from its router. Handler bodies belong to the embedder; this
//! module only owns dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use mcp_protocol_core::McpError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, McpError>> + Send + Sync>;
pub type NotificationHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<(), McpError>> + Send + Sync>;

/// One registered method: at least one of `request_handler` /
/// `notification_handler` must be present (enforced by
/// [`RouterBuilder::add_route`]).
#[derive(Clone)]
pub struct Route {
    pub method: String,
    pub request_handler: Option<RequestHandler>,
    pub notification_handler: Option<NotificationHandler>,
}

impl Route {
    pub fn for_request(method: impl Into<String>, handler: RequestHandler) -> Self {
        Self {
            method: method.into(),
            request_handler: Some(handler),
            notification_handler: None,
        }
    }

    pub fn for_notification(method: impl Into<String>, handler: NotificationHandler) -> Self {
        Self {
            method: method.into(),
            request_handler: None,
            notification_handler: Some(handler),
        }
    }
}

/// Registration-phase router. Call [`RouterBuilder::build`] to freeze it
/// into an [`Arc<Router>`] before serving any connection.
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<String, Route>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(mut self, route: Route) -> Result<Self, McpError> {
        if route.method.is_empty() {
            return Err(McpError::invalid_params("route method name cannot be empty"));
        }
        if route.request_handler.is_none() && route.notification_handler.is_none() {
            return Err(McpError::invalid_params(format!(
                "route for '{}' has neither a request nor a notification handler",
                route.method
            )));
        }
        if self.routes.contains_key(&route.method) {
            return Err(McpError::invalid_params(format!(
                "method '{}' is already registered",
                route.method
            )));
        }
        self.routes.insert(route.method.clone(), route);
        Ok(self)
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
        }
    }
}

/// A frozen, registered method table. Cheap to share behind an `Arc` across
/// every connection the engine serves.
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    /// Dispatch one call. Implements the four rules a method table needs:
    ///
    /// - unknown method → `(None, Some(MethodNotFound))`
    /// - a request (`is_notification == false`) hitting a method with only a
    ///   `notification_handler` → `MethodNotFound` (a caller expecting a
    ///   reply from a fire-and-forget method is itself a protocol error)
    /// - a notification hitting a method with only a `request_handler` → the
    ///   handler still runs (its result is useful for side effects) and its
    ///   success value is discarded, since a notification never gets a
    ///   reply, but a handler error still propagates as `(None, Some(err))`
    /// - otherwise the matching handler runs and its outcome is returned
    pub async fn route(
        &self,
        method: &str,
        params: Option<Value>,
        is_notification: bool,
    ) -> (Option<Value>, Option<McpError>) {
        let route = match self.routes.get(method) {
            Some(route) => route,
            None => return (None, Some(McpError::method_not_found(method))),
        };

        if is_notification {
            if let Some(handler) = &route.notification_handler {
                return match handler(params).await {
                    Ok(()) => (None, None),
                    Err(e) => (None, Some(e)),
                };
            }
            if let Some(handler) = &route.request_handler {
                return match handler(params).await {
                    Ok(_) => (None, None),
                    Err(e) => (None, Some(e)),
                };
            }
            (None, Some(McpError::method_not_found(method)))
        } else if let Some(handler) = &route.request_handler {
            match handler(params).await {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e)),
            }
        } else {
            (None, Some(McpError::method_not_found(method)))
        }
    }

    pub fn get_routes(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.routes.keys().cloned().collect();
        methods.sort();
        methods
    }
}
