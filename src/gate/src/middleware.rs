//! Tower middleware that gates requests on the policy verdict
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use rego_gate::{Config, PolicyGate, PolicyGateLayer};
//! use std::sync::Arc;
//!
//! # fn build(policy: &str) -> rego_gate::Result<Router> {
//! let gate = Arc::new(PolicyGate::new(Config::new(policy, "data.policy.allow"))?);
//! let app: Router = Router::new()
//!     .route("/api/v1/users", get(|| async { "users" }))
//!     .layer(PolicyGateLayer::new(gate));
//! # Ok(app)
//! # }
//! ```

use axum::{
    http::{Request, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use crate::bindings::{BindingExtractor, RequestBindings};
use crate::engine::{Denial, PolicyGate};

/// Denial response body
#[derive(Debug, Serialize)]
struct DenialBody {
    error: &'static str,
    message: String,
}

/// Layer wrapping services with a [`PolicyGateService`]
#[derive(Clone)]
pub struct PolicyGateLayer {
    gate: Arc<PolicyGate>,
    extractor: Arc<dyn BindingExtractor>,
}

impl PolicyGateLayer {
    /// Gate requests binding `path` and `method`
    pub fn new(gate: Arc<PolicyGate>) -> Self {
        Self::with_extractor(gate, RequestBindings::default())
    }

    /// Gate requests with a custom binding extractor
    pub fn with_extractor(gate: Arc<PolicyGate>, extractor: impl BindingExtractor) -> Self {
        Self {
            gate,
            extractor: Arc::new(extractor),
        }
    }
}

impl<S> Layer<S> for PolicyGateLayer {
    type Service = PolicyGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PolicyGateService {
            inner,
            gate: Arc::clone(&self.gate),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

/// Forwards admitted requests to `inner`, rejects the rest
#[derive(Clone)]
pub struct PolicyGateService<S> {
    inner: S,
    gate: Arc<PolicyGate>,
    extractor: Arc<dyn BindingExtractor>,
}

impl<S, B> Service<Request<B>> for PolicyGateService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = Arc::clone(&self.gate);
        let extractor = Arc::clone(&self.extractor);

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let bindings = extractor.extract(&parts);
            let (decision, denial) = gate.authorize_with_denial(&bindings).await;

            if decision.allowed {
                debug!("Request {} {} admitted ({})", parts.method, parts.uri.path(), decision.id);
                return inner.call(Request::from_parts(parts, body)).await;
            }

            debug!("Request {} {} rejected ({})", parts.method, parts.uri.path(), decision.id);
            Ok(denial_response(denial))
        })
    }
}

/// Response for a rejected request
fn denial_response(denial: Denial) -> Response {
    let status = StatusCode::from_u16(denial.status).unwrap_or(StatusCode::FORBIDDEN);

    let body = Json(DenialBody {
        error: "forbidden",
        message: denial.message.to_string(),
    });

    (status, body).into_response()
}
