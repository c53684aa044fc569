use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde_json::json;

use crate::{Error, Result};

/// Process-wide request budget
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub fn create_rate_limiter(requests_per_minute: u32) -> Result<GlobalRateLimiter> {
    let per_minute = NonZeroU32::new(requests_per_minute)
        .ok_or_else(|| Error::Config("Requests per minute must be non-zero".to_string()))?;
    Ok(Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))))
}

pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "message": "Too many requests, please try again later." })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_budget() {
        let limiter = create_rate_limiter(2).unwrap();

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(matches!(create_rate_limiter(0), Err(Error::Config(_))));
    }
}
