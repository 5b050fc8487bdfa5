use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{Span, field, info, instrument, warn};

use super::transport::{MethodInvocation, MethodResponse};

/// Name of the only method the simulated device subscribes to
pub const OFF: &str = "Off";

pub type MethodHandler = Arc<dyn Fn(&MethodInvocation) -> MethodResponse + Send + Sync>;

/// Direct method handler table keyed by method name
#[derive(Clone, Default)]
pub struct MethodTable {
    handlers: HashMap<String, MethodHandler>,
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table the simulated device registers with the remote
    pub fn device() -> Self {
        Self::new().with_handler(OFF, off_handler)
    }

    /// Register `handler` for invocations of `name`, replacing any
    /// previous handler
    pub fn with_handler<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&MethodInvocation) -> MethodResponse + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Registered method names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    #[instrument(name = "method", skip_all, fields(name = %invocation.name, status = field::Empty))]
    pub fn dispatch(&self, invocation: &MethodInvocation) -> MethodResponse {
        let response = match self.handlers.get(&invocation.name) {
            Some(handler) => handler(invocation),
            None => {
                warn!("no handler registered");
                MethodResponse::new(501, r#"{"message":"method not implemented"}"#)
            }
        };
        Span::current().record("status", response.status);
        response
    }
}

/// Handler for the `Off` method.
///
/// The response does not depend on the invoked name or payload.
pub fn off_handler(invocation: &MethodInvocation) -> MethodResponse {
    info!("direct method ({}) invoked", invocation.name);
    MethodResponse::new(200, "'DM call sucess'")
}
