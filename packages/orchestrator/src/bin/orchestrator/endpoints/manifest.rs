use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::app::manifest::AssumptionsManifest;
use crate::app::App;

/// The runtime assumptions manifest, exactly as validated at startup.
pub(crate) async fn manifest(State(app): State<Arc<App>>) -> Json<AssumptionsManifest> {
    Json(app.manifest.clone())
}
