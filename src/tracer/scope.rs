//! Request scope for log correlation.
//!
//! The correlation id of the request being served is visible to code running
//! inside that request's task, and nowhere else. Trace context itself is
//! never read from here; it is always passed explicitly.

use std::future::Future;

use crate::ids::{CorrelationId, TraceId};

tokio::task_local! {
    static REQUEST_SCOPE: RequestScope;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestScope {
    pub correlation_id: CorrelationId,
    pub trace_id: TraceId,
}

/// Run `fut` with `scope` as the current request scope.
pub async fn in_request_scope<F: Future>(scope: RequestScope, fut: F) -> F::Output {
    REQUEST_SCOPE.scope(scope, fut).await
}

pub fn current() -> Option<RequestScope> {
    REQUEST_SCOPE.try_with(Clone::clone).ok()
}

pub fn current_correlation_id() -> Option<CorrelationId> {
    REQUEST_SCOPE.try_with(|s| s.correlation_id.clone()).ok()
}
