// SPDX-License-Identifier: Apache-2.0

//! Listener Pipeline
//!
//! Fans every notification out to the registered listeners:
//! 1. Listeners run synchronously on the caller's thread, in registration order
//! 2. A failing listener never stops the fan-out; failures are collected
//! 3. The configured [`ListenerFailurePolicy`] decides what the caller sees

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::{ExecutionContext, MethodContext};
use crate::error::{BoxError, ListenerErrors, ListenerFailure, ListenerPhase};

/// Result returned by listener callbacks
pub type ListenerResult = Result<(), BoxError>;

/// Observer of intercepted driver calls
///
/// Every callback defaults to a no-op.
pub trait QueryListener: Send + Sync {
    /// Name reported when this listener fails
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn after_query(&self, _ctx: &ExecutionContext) -> ListenerResult {
        Ok(())
    }

    fn before_method(&self, _ctx: &MethodContext) -> ListenerResult {
        Ok(())
    }

    fn after_method(&self, _ctx: &MethodContext) -> ListenerResult {
        Ok(())
    }
}

/// What an intercepted call does with collected listener failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerFailurePolicy {
    /// Log each failure; the call result is unaffected
    #[default]
    Log,
    /// Return the failures as [`ProxyError::Listener`](crate::ProxyError::Listener)
    Propagate,
}

impl ListenerFailurePolicy {
    /// Applies the policy to failures gathered during one call
    ///
    /// Callers attach the successful driver result to the returned errors.
    pub fn resolve(&self, failures: Vec<ListenerFailure>) -> Result<(), ListenerErrors> {
        if failures.is_empty() {
            return Ok(());
        }
        match self {
            Self::Log => {
                log_failures(&failures);
                Ok(())
            }
            Self::Propagate => Err(ListenerErrors::new(failures)),
        }
    }
}

/// Logs listener failures that cannot be returned to the caller
pub(crate) fn log_failures(failures: &[ListenerFailure]) {
    for failure in failures {
        warn!(
            listener = %failure.listener,
            phase = %failure.phase,
            "Listener failed: {}",
            failure.source
        );
    }
}

/// Ordered multiplexer over registered listeners
#[derive(Default)]
pub struct ListenerPipeline {
    listeners: RwLock<Vec<Arc<dyn QueryListener>>>,
}

impl ListenerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn QueryListener>) {
        debug!("Registered query listener {}", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn after_query(&self, ctx: &ExecutionContext) -> Result<(), ListenerErrors> {
        self.fan_out(ListenerPhase::AfterQuery, |l| l.after_query(ctx))
    }

    pub fn before_method(&self, ctx: &MethodContext) -> Result<(), ListenerErrors> {
        self.fan_out(ListenerPhase::BeforeMethod, |l| l.before_method(ctx))
    }

    pub fn after_method(&self, ctx: &MethodContext) -> Result<(), ListenerErrors> {
        self.fan_out(ListenerPhase::AfterMethod, |l| l.after_method(ctx))
    }

    fn fan_out<F>(&self, phase: ListenerPhase, mut notify: F) -> Result<(), ListenerErrors>
    where
        F: FnMut(&dyn QueryListener) -> ListenerResult,
    {
        // listeners may register further listeners from a callback
        let snapshot = self.listeners.read().clone();
        let failures: Vec<ListenerFailure> = snapshot
            .iter()
            .filter_map(|listener| {
                notify(listener.as_ref()).err().map(|source| ListenerFailure {
                    listener: listener.name().to_string(),
                    phase,
                    source,
                })
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ListenerErrors::new(failures))
        }
    }
}

impl std::fmt::Debug for ListenerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .listeners
            .read()
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        f.debug_struct("ListenerPipeline")
            .field("listeners", &names)
            .finish()
    }
}

/// Collects failures across the phases of one intercepted call
#[derive(Default)]
pub(crate) struct FailureCollector {
    failures: Vec<ListenerFailure>,
}

impl FailureCollector {
    pub(crate) fn absorb(&mut self, outcome: Result<(), ListenerErrors>) {
        if let Err(errors) = outcome {
            self.failures.extend(errors.failures);
        }
    }

    pub(crate) fn into_failures(self) -> Vec<ListenerFailure> {
        self.failures
    }
}
