//! Operation Registry (spec.md §2 bullet 4): maps an incoming action name
//! to the handler that can satisfy it, and tags each outbound action with
//! the send-hooks the queue needs (transaction-scoped or not).
//!
//! Grounded on the teacher's `interfaces/ws/ocpp_v16` dispatch tables,
//! which match on `action` strings pulled out of a parsed `Frame` and
//! route to a handler function; here the table is data (a `HashMap` built
//! once at startup) rather than a `match`, since the registry is meant to
//! be introspectable (`GetConfiguration`-style listing of what this
//! charge point supports) and extensible per spec.md §6 "Operation
//! Registry: action name -> handler factory".

use std::collections::HashMap;

use serde_json::Value;

use crate::error::QueueError;

/// A handler for one incoming CSMS-initiated action (`RemoteStartTransaction`,
/// `Reset`, `UnlockConnector`, ...). Implementors live in the engine /
/// availability / firmware modules; the registry only holds the mapping.
pub trait OperationHandler: Send + Sync {
    fn handle(&self, payload: Value) -> Result<Value, QueueError>;
}

/// Whether an outbound action is transaction-scoped (held behind the
/// BootNotification-Pending gate) or may always be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendClass {
    TransactionScoped,
    Always,
}

pub struct OperationRegistry {
    incoming: HashMap<String, Box<dyn OperationHandler>>,
    outgoing_classes: HashMap<&'static str, SendClass>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        let mut outgoing_classes = HashMap::new();
        for action in [
            "StartTransaction",
            "StopTransaction",
            "TransactionEvent",
            "MeterValues",
        ] {
            outgoing_classes.insert(action, SendClass::TransactionScoped);
        }
        for action in [
            "BootNotification",
            "Heartbeat",
            "StatusNotification",
            "Authorize",
            "DataTransfer",
            "FirmwareStatusNotification",
            "DiagnosticsStatusNotification",
        ] {
            outgoing_classes.insert(action, SendClass::Always);
        }
        Self {
            incoming: HashMap::new(),
            outgoing_classes,
        }
    }

    pub fn register(&mut self, action: impl Into<String>, handler: Box<dyn OperationHandler>) {
        self.incoming.insert(action.into(), handler);
    }

    pub fn dispatch(&self, action: &str, payload: Value) -> Result<Value, QueueError> {
        match self.incoming.get(action) {
            Some(handler) => handler.handle(payload),
            None => Err(QueueError::InvalidResponse(format!(
                "unsupported action: {action}"
            ))),
        }
    }

    pub fn send_class(&self, action: &str) -> SendClass {
        self.outgoing_classes
            .get(action)
            .copied()
            .unwrap_or(SendClass::Always)
    }

    pub fn supported_actions(&self) -> Vec<&str> {
        self.incoming.keys().map(String::as_str).collect()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;
    impl OperationHandler for Echo {
        fn handle(&self, payload: Value) -> Result<Value, QueueError> {
            Ok(payload)
        }
    }

    #[test]
    fn dispatch_routes_to_registered_handler() {
        let mut registry = OperationRegistry::new();
        registry.register("UnlockConnector", Box::new(Echo));
        let result = registry.dispatch("UnlockConnector", json!({"connectorId": 1})).unwrap();
        assert_eq!(result, json!({"connectorId": 1}));
    }

    #[test]
    fn dispatch_rejects_unsupported_action() {
        let registry = OperationRegistry::new();
        let err = registry.dispatch("Nonsense", json!({})).unwrap_err();
        assert!(matches!(err, QueueError::InvalidResponse(_)));
    }

    #[test]
    fn start_transaction_is_transaction_scoped() {
        let registry = OperationRegistry::new();
        assert_eq!(registry.send_class("StartTransaction"), SendClass::TransactionScoped);
        assert_eq!(registry.send_class("Heartbeat"), SendClass::Always);
    }
}
