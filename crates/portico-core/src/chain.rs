// crates/portico-core/src/chain.rs
//
// Ordered interceptor chain.
//
// A chain is a list of stages wrapped around a terminal invoker. Each stage
// receives the call and a `Next` handle; it may rewrite the call, short-circuit
// with an error, or delegate to `next.run(call)` and inspect the outcome.
// The first stage in the list is the outermost wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::call::{Call, Reply};
use crate::error::RpcError;
use crate::traits::Invoker;

/// Boxed, sendable future used where recursion needs a nameable type.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One interceptor in a chain.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in configuration and logs.
    fn name(&self) -> &str;

    /// Handle the call, usually by calling `next.run(call)` once.
    async fn wrap(&self, call: Call, next: Next<'_>) -> Result<Reply, RpcError>;
}

/// The remainder of a chain as seen from inside a stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    terminal: &'a dyn Invoker,
}

impl<'a> Next<'a> {
    /// Pass the call to the next stage, or to the terminal invoker when no
    /// stages remain.
    pub fn run(self, call: Call) -> BoxFuture<'a, Result<Reply, RpcError>> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    terminal: self.terminal,
                };
                stage.wrap(call, next)
            }
            None => self.terminal.invoke(call),
        }
    }

    /// Stages still to run after this point.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// An immutable, ordered list of stages.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    /// An empty chain; invoking it calls the terminal directly.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Stage names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the call through every stage and then the terminal.
    pub async fn invoke(&self, call: Call, terminal: &dyn Invoker) -> Result<Reply, RpcError> {
        Next {
            stages: &self.stages,
            terminal,
        }
        .run(call)
        .await
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("stages", &self.names()).finish()
    }
}

/// Builder for [`Chain`].
#[derive(Default)]
pub struct ChainBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl ChainBuilder {
    /// Append a stage; earlier stages wrap later ones.
    pub fn stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_arc(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Chain {
        Chain {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records the order stages ran in and the metadata the terminal saw.
    struct Recorder {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Invoker for Recorder {
        async fn invoke(&self, call: Call) -> Result<Reply, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let trail: Vec<String> = call
                .metadata
                .get_all("x-trail")
                .to_vec();
            *self.seen.lock().unwrap() = trail;
            Ok(Reply::Unary(call.input.into_unary()?))
        }
    }

    struct Tag(&'static str);

    #[async_trait]
    impl Stage for Tag {
        fn name(&self) -> &str {
            self.0
        }

        async fn wrap(&self, mut call: Call, next: Next<'_>) -> Result<Reply, RpcError> {
            call.metadata.append("x-trail", self.0);
            next.run(call).await
        }
    }

    struct Reject;

    #[async_trait]
    impl Stage for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        async fn wrap(&self, _call: Call, _next: Next<'_>) -> Result<Reply, RpcError> {
            Err(RpcError::InvalidArgument("rejected".to_string()))
        }
    }

    /// Rewrites the successful response on the way out.
    struct Upper;

    #[async_trait]
    impl Stage for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn wrap(&self, call: Call, next: Next<'_>) -> Result<Reply, RpcError> {
            let value = next.run(call).await?.into_unary()?;
            let text = value.as_str().unwrap_or_default().to_uppercase();
            Ok(Reply::Unary(Value::String(text)))
        }
    }

    #[tokio::test]
    async fn stages_run_in_order_and_terminal_once() {
        let chain = Chain::builder().stage(Tag("a")).stage(Tag("b")).build();
        let terminal = Recorder::new();

        let reply = chain
            .invoke(Call::unary("/svc/M", json!("hi")), &terminal)
            .await
            .expect("ok");

        assert_eq!(reply.into_unary().expect("unary"), json!("hi"));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*terminal.seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(chain.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_chain_calls_terminal() {
        let chain = Chain::new();
        let terminal = Recorder::new();
        chain
            .invoke(Call::unary("/svc/M", json!(1)), &terminal)
            .await
            .expect("ok");
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn failing_stage_short_circuits() {
        let chain = Chain::builder()
            .stage(Tag("a"))
            .stage(Reject)
            .stage(Tag("c"))
            .build();
        let terminal = Recorder::new();

        let result = chain
            .invoke(Call::unary("/svc/M", json!(1)), &terminal)
            .await;

        assert!(matches!(result, Err(RpcError::InvalidArgument(_))));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn outer_stage_sees_inner_result() {
        let chain = Chain::builder().stage(Upper).stage(Tag("a")).build();
        let terminal = Recorder::new();

        let reply = chain
            .invoke(Call::unary("/svc/M", json!("quiet")), &terminal)
            .await
            .expect("ok");
        assert_eq!(reply.into_unary().expect("unary"), json!("QUIET"));
    }
}
