//! Role dispatch
//!
//! A [`Dispatcher`] holds the handlers one role exposes to its peer, keyed by
//! action name. Binding is checked against the registry: a handler can only
//! be bound for a registered action that this role actually receives.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{HandlerError, RegistryError};
use crate::registry::{Registry, Role};
use crate::types::Request;

/// Handler for one inbound action
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, connection_id: &str, request: Value) -> Result<Value, HandlerError>;
}

/// Adapter for async closures over raw JSON
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, connection_id: &str, request: Value) -> Result<Value, HandlerError> {
        (self.0)(connection_id.to_string(), request).await
    }
}

/// Adapter for async closures over a typed request body
struct TypedHandler<R, F> {
    f: F,
    _request: PhantomData<fn(R)>,
}

#[async_trait]
impl<R, F, Fut> Handler for TypedHandler<R, F>
where
    R: Request,
    F: Fn(String, R) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R::Response, HandlerError>> + Send,
{
    async fn handle(&self, connection_id: &str, request: Value) -> Result<Value, HandlerError> {
        let request: R = serde_json::from_value(request)?;
        let response = (self.f)(connection_id.to_string(), request).await?;
        Ok(serde_json::to_value(response)?)
    }
}

/// Capability set of one role
pub struct Dispatcher {
    role: Role,
    registry: Arc<Registry>,
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new(role: Role, registry: Arc<Registry>) -> Self {
        Self {
            role,
            registry,
            handlers: HashMap::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bind `handler` to `action`, replacing any previous binding
    pub fn register(&mut self, action: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let feature = self.registry.resolve(action)?;
        if !feature.direction().receiver_allowed(self.role) {
            return Err(RegistryError::WrongReceiver {
                action: action.to_string(),
                role: self.role,
            });
        }

        debug!(role = %self.role, action, "Bound handler");
        self.handlers.insert(action.to_string(), handler);
        Ok(())
    }

    /// Bind an async closure over raw JSON
    pub fn on<F, Fut>(&mut self, action: &str, f: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(action, Arc::new(FnHandler(f)))?;
        Ok(self)
    }

    /// Bind an async closure over a typed request body
    pub fn on_request<R, F, Fut>(&mut self, f: F) -> Result<&mut Self, RegistryError>
    where
        R: Request,
        F: Fn(String, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response, HandlerError>> + Send + 'static,
    {
        let handler = TypedHandler {
            f,
            _request: PhantomData,
        };
        self.register(R::ACTION, Arc::new(handler))?;
        Ok(self)
    }

    pub fn is_bound(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Actions this role must be able to receive
    pub fn capabilities(&self) -> Vec<&str> {
        self.registry.inbound_for(self.role)
    }

    /// Receivable actions that have no handler yet
    pub fn missing(&self) -> Vec<&str> {
        self.capabilities()
            .into_iter()
            .filter(|action| !self.handlers.contains_key(*action))
            .collect()
    }

    /// Route an inbound request to its handler.
    ///
    /// An action without a bound handler yields `NotImplemented`.
    pub async fn handle(
        &self,
        connection_id: &str,
        action: &str,
        request: Value,
    ) -> Result<Value, HandlerError> {
        match self.handlers.get(action) {
            Some(handler) => handler.handle(connection_id, request).await,
            None => Err(HandlerError::not_implemented(action)),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<&String> = self.handlers.keys().collect();
        bound.sort();
        f.debug_struct("Dispatcher")
            .field("role", &self.role)
            .field("handlers", &bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ErrorCode;
    use crate::registry::{Direction, Feature, Profile};
    use crate::types::{CostUpdatedRequest, CostUpdatedResponse};
    use crate::validate::Shape;
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        let profile = Profile::new("Test")
            .feature(Feature::new("CostUpdated", Direction::ToStation, Shape::new("Req"), Shape::new("Conf")))
            .feature(Feature::new("Reset", Direction::ToStation, Shape::new("Req"), Shape::new("Conf")))
            .feature(Feature::new("Heartbeat", Direction::ToCsms, Shape::new("Req"), Shape::new("Conf")));
        Arc::new(Registry::with_profiles([profile]).unwrap())
    }

    #[tokio::test]
    async fn test_routes_to_bound_handler() {
        let mut dispatcher = Dispatcher::new(Role::ChargingStation, registry());
        dispatcher
            .on("Reset", |conn, req| async move {
                Ok(json!({"conn": conn, "echo": req}))
            })
            .unwrap();

        let out = dispatcher.handle("cs-1", "Reset", json!({"type": "Immediate"})).await.unwrap();
        assert_eq!(out, json!({"conn": "cs-1", "echo": {"type": "Immediate"}}));
    }

    #[tokio::test]
    async fn test_unbound_action_is_not_implemented() {
        let dispatcher = Dispatcher::new(Role::ChargingStation, registry());
        let err = dispatcher.handle("cs-1", "Reset", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let mut dispatcher = Dispatcher::new(Role::ChargingStation, registry());
        dispatcher
            .on_request(|_conn, req: CostUpdatedRequest| async move {
                assert_eq!(req.transaction_id, "tx-9");
                Ok(CostUpdatedResponse::default())
            })
            .unwrap();

        let out = dispatcher
            .handle("cs-1", "CostUpdated", json!({"totalCost": 3.2, "transactionId": "tx-9"}))
            .await
            .unwrap();
        assert_eq!(out, json!({}));

        let err = dispatcher
            .handle("cs-1", "CostUpdated", json!({"totalCost": "free"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FormatViolation);
    }

    #[test]
    fn test_binding_checks_registry_and_role() {
        let mut dispatcher = Dispatcher::new(Role::ChargingStation, registry());

        let err = dispatcher.on("Nope", |_, _| async { Ok(json!({})) }).unwrap_err();
        assert_eq!(err, RegistryError::UnknownMessageType("Nope".into()));

        let err = dispatcher.on("Heartbeat", |_, _| async { Ok(json!({})) }).unwrap_err();
        assert!(matches!(err, RegistryError::WrongReceiver { .. }));
    }

    #[test]
    fn test_capabilities_and_missing() {
        let mut dispatcher = Dispatcher::new(Role::ChargingStation, registry());
        assert_eq!(dispatcher.capabilities(), vec!["CostUpdated", "Reset"]);

        dispatcher.on("Reset", |_, _| async { Ok(json!({})) }).unwrap();
        assert_eq!(dispatcher.missing(), vec!["CostUpdated"]);
        assert!(dispatcher.is_bound("Reset"));
    }
}
