//! Human-readable API documentation

use axum::response::Html;

const DOCS_HTML: &str = include_str!("../docs.html");

pub async fn api_docs() -> Html<&'static str> {
    Html(DOCS_HTML)
}
