use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use reqwest::StatusCode;

use crate::app::App;

pub(crate) async fn all(State(app): State<Arc<App>>) -> impl IntoResponse {
    app.statuses.all_statuses_text()
}

pub(crate) async fn single(
    State(app): State<Arc<App>>,
    Path(label): Path<String>,
) -> impl IntoResponse {
    match app.statuses.single_status_text(&label) {
        Some(response) => response,
        None => (StatusCode::NOT_FOUND, format!("No task named {label}\n")).into_response(),
    }
}
