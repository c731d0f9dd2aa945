//! Tower middleware running the limiter around an HTTP service.
//!
//! Before the request reaches the inner service the limiter checks it. A
//! rejection short-circuits with [`AdmissionError::RateLimited`], carrying
//! the quota headers for the violated limit. Otherwise the reporting limit
//! is stored in the request extensions, the inner service runs, and the
//! three quota headers are written on its response.

use futures::future::BoxFuture;
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

use crate::error::{AdmissionError, RateLimitExceeded};
use crate::limiter::Limiter;
use crate::report::HeaderNames;
use crate::resource::Resource;

/// A layer that puts a [`Limiter`] in front of the routes of one [`Resource`].
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<Limiter>,
    resource: Arc<dyn Resource>,
}

impl RateLimitLayer {
    /// Create a new rate limit layer.
    pub fn new<R: Resource + 'static>(limiter: Arc<Limiter>, resource: R) -> Self {
        Self { limiter, resource: Arc::new(resource) }
    }

    /// Same as [`new`](Self::new) for a resource that is already shared.
    pub fn with_shared_resource(limiter: Arc<Limiter>, resource: Arc<dyn Resource>) -> Self {
        Self { limiter, resource }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            resource: self.resource.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<Limiter>,
    resource: Arc<dyn Resource>,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for RateLimitService<S>
where
    S: Service<Request<ReqB>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqB: Send + 'static,
    ResB: Send + 'static,
{
    type Response = Response<ResB>;
    type Error = AdmissionError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        let limiter = self.limiter.clone();
        let resource = self.resource.clone();
        // The clone may not be ready; keep the one poll_ready drove.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let admission = limiter.check(&parts, &*resource).await?;

            if let Some(mut rejection) = admission.rejection() {
                if let Some(reporting) = admission.reporting() {
                    if let Some(headers) = limiter.report(reporting).await? {
                        rejection = rejection.with_headers(headers);
                    }
                }
                return Err(AdmissionError::RateLimited(rejection));
            }

            let reporting = admission.into_reporting();
            if let Some(reporting) = &reporting {
                parts.extensions.insert(reporting.clone());
            }

            let mut response = inner
                .call(Request::from_parts(parts, body))
                .await
                .map_err(AdmissionError::Inner)?;

            if let Some(reporting) = reporting {
                if let Some(headers) = limiter.report(&reporting).await? {
                    headers.apply(response.headers_mut(), limiter.header_names());
                }
            }
            Ok::<_, AdmissionError<S::Error>>(response)
        })
    }
}

/// Render a rejection as a `429` response with a plain-text body and the quota headers.
pub fn rejection_response<B: From<String>>(rejection: &RateLimitExceeded, names: &HeaderNames) -> Response<B> {
    let mut response = Response::new(B::from(rejection.to_string()));
    *response.status_mut() = rejection.status();
    if let Some(headers) = rejection.headers() {
        headers.apply(response.headers_mut(), names);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::parse;
    use crate::report::RateLimitHeaders;
    use http::StatusCode;

    #[test]
    fn rejection_response_carries_status_and_headers() {
        let rejection = RateLimitExceeded::new(parse("1/hour").unwrap())
            .with_headers(RateLimitHeaders { limit: 1, remaining: 0, reset: 3599 });
        let response: Response<String> = rejection_response(&rejection, &HeaderNames::default());

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.body(), "rate limit exceeded, 1 per 1 hour");
        assert_eq!(response.headers()["x-ratelimit-reset"], "3599");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }
}
