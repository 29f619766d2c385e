use axum::response::IntoResponse;

/// Undocumented root route; points callers at the health endpoint.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
