#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use qore_core::mock::{MockDataSource, MockState};
use qore_proxy::config::ProxyConfigBuilder;
use qore_proxy::interceptor::{ExecutionContext, ListenerResult, MethodContext, QueryListener};
use qore_proxy::ProxyDataSource;

/// Captures every notification it receives
#[derive(Default)]
pub struct RecordingListener {
    pub contexts: Mutex<Vec<ExecutionContext>>,
    pub methods: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> ExecutionContext {
        self.contexts
            .lock()
            .last()
            .cloned()
            .expect("no execution recorded")
    }

    pub fn count(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().clone()
    }
}

impl QueryListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn after_query(&self, ctx: &ExecutionContext) -> ListenerResult {
        self.contexts.lock().push(ctx.clone());
        Ok(())
    }

    fn before_method(&self, ctx: &MethodContext) -> ListenerResult {
        self.methods.lock().push(format!("before {}", ctx.method));
        Ok(())
    }

    fn after_method(&self, ctx: &MethodContext) -> ListenerResult {
        let suffix = if ctx.failure.is_some() { " (failed)" } else { "" };
        self.methods
            .lock()
            .push(format!("after {}{}", ctx.method, suffix));
        Ok(())
    }
}

/// Records its label into a shared journal and optionally fails
pub struct OrderedListener {
    pub label: &'static str,
    pub journal: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl QueryListener for OrderedListener {
    fn name(&self) -> &str {
        self.label
    }

    fn after_query(&self, ctx: &ExecutionContext) -> ListenerResult {
        let outcome = if ctx.is_success() { "ok" } else { "failed" };
        self.journal
            .lock()
            .push(format!("{}:{}", self.label, outcome));
        if self.fail {
            return Err(format!("{} could not record", self.label).into());
        }
        Ok(())
    }
}

/// Proxy data source over a fresh mock driver, with a recording listener
pub fn proxied(builder: ProxyConfigBuilder) -> (ProxyDataSource, Arc<MockState>, Arc<RecordingListener>) {
    let mock = MockDataSource::new("orders");
    let state = mock.state();
    let recorder = RecordingListener::new();
    let config = builder
        .data_source_name("orders")
        .listener(recorder.clone())
        .build();
    let ds = ProxyDataSource::new(Box::new(mock), Arc::new(config));
    (ds, state, recorder)
}
