use axum::{extract::Request, extract::State, middleware::Next, response::Response};

/// Opens the error-details scope for the request.
///
/// The state flag comes from `AppConfig::expose_error_details()`; when it is
/// false, 5xx bodies carry only a generic message.
pub async fn error_details_middleware(
    State(expose): State<bool>,
    request: Request,
    next: Next,
) -> Response {
    crate::errors::scope_error_details(expose, next.run(request)).await
}
