//! Filter pipeline — request filter, handler, response filter, with one failure boundary.
//!
//! ```text
//! ctx ──▶ request filter? ──▶ handler.process ──▶ response filter? ──▶ response
//!              │                    │                    │
//!              └──────── HandlerError ───────────────────┘
//!                              │
//!                              ▼
//!              exception handler? ──▶ response
//!                    (absent) ──▶ Response::network_error()
//! ```
//!
//! Every stage is optional except the handler. A failure anywhere short-circuits the
//! remaining stages and is translated into a response exactly once, so the pipeline
//! itself never fails. A panic in any stage is treated as a failure with the panic
//! message.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, warn};

use crate::BoxFuture;
use crate::context::RequestContext;
use crate::http::Response;
use crate::router::{HandlerError, RequestHandler};

/// Transforms the context before it reaches the handler.
pub type RequestFilter = Arc<
    dyn Fn(RequestContext) -> BoxFuture<'static, Result<RequestContext, HandlerError>>
        + Send
        + Sync
        + 'static,
>;

/// Transforms the handler's response before it is returned.
pub type ResponseFilter =
    Arc<dyn Fn(Response) -> BoxFuture<'static, Result<Response, HandlerError>> + Send + Sync + 'static>;

/// Turns a failure raised inside the pipeline into a response.
pub type ExceptionHandler =
    Arc<dyn Fn(HandlerError) -> BoxFuture<'static, Response> + Send + Sync + 'static>;

/// Erase an async closure into a [`RequestFilter`].
pub fn request_filter<F, Fut>(filter: F) -> RequestFilter
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RequestContext, HandlerError>> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, Result<RequestContext, HandlerError>> { Box::pin(filter(ctx)) })
}

/// Erase an async closure into a [`ResponseFilter`].
pub fn response_filter<F, Fut>(filter: F) -> ResponseFilter
where
    F: Fn(Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    Arc::new(move |response| -> BoxFuture<'static, Result<Response, HandlerError>> { Box::pin(filter(response)) })
}

/// Erase an async closure into an [`ExceptionHandler`].
pub fn exception_handler<F, Fut>(handler: F) -> ExceptionHandler
where
    F: Fn(HandlerError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |error| -> BoxFuture<'static, Response> { Box::pin(handler(error)) })
}

/// The optional stages wrapped around every routed handler.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    request_filter: Option<RequestFilter>,
    response_filter: Option<ResponseFilter>,
    exception_handler: Option<ExceptionHandler>,
}

impl FilterPipeline {
    pub fn new(
        request_filter: Option<RequestFilter>,
        response_filter: Option<ResponseFilter>,
        exception_handler: Option<ExceptionHandler>,
    ) -> Self {
        Self {
            request_filter,
            response_filter,
            exception_handler,
        }
    }

    /// Run `handler` on `ctx` through the filters.
    ///
    /// Never fails: a [`HandlerError`] from any stage goes to the exception handler,
    /// or becomes [`Response::network_error`] when none is configured.
    pub async fn run(&self, ctx: RequestContext, handler: &dyn RequestHandler) -> Response {
        let outcome = AssertUnwindSafe(self.try_run(ctx, handler))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "request handling panicked");
                Err(HandlerError::new(message))
            });

        match outcome {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "request handling failed");
                match &self.exception_handler {
                    Some(exception_handler) => exception_handler(error).await,
                    None => Response::network_error(),
                }
            }
        }
    }

    async fn try_run(
        &self,
        ctx: RequestContext,
        handler: &dyn RequestHandler,
    ) -> Result<Response, HandlerError> {
        let ctx = match &self.request_filter {
            Some(filter) => filter(ctx).await?,
            None => ctx,
        };

        let response = handler.process(ctx).await?;

        match &self.response_filter {
            Some(filter) => filter(response).await,
            None => Ok(response),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("request_filter", &self.request_filter.is_some())
            .field("response_filter", &self.response_filter.is_some())
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}
