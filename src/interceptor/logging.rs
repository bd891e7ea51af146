use crate::interceptor::{Interceptor, InvocationContext, InvocationResult, Next};
use std::time::Instant;

/// Logs each intercepted call with its outcome and duration.
///
/// Adds no suspension point of its own, so a synchronous chain stays
/// synchronous.
#[derive(Clone, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn intercept(&self, invocation: InvocationContext, next: Next) -> InvocationResult {
        let description = invocation.description();
        let start = Instant::now();

        tracing::info!("--> {}", description);

        next.proceed().inspect_result(move |result| {
            let duration = start.elapsed();
            match result {
                Ok(_) => tracing::info!("<-- {} {:?}", description, duration),
                Err(e) => tracing::warn!("<-- {} ERROR: {} {:?}", description, e, duration),
            }
        })
    }
}
