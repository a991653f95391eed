use axum::routing::get;
use reqwest::{header::CONTENT_TYPE, Method};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::app::AppBuilder;

pub(crate) mod common;
pub(crate) mod diagnostics;
pub(crate) mod manifest;
pub(crate) mod status;

impl AppBuilder {
    pub(crate) fn start_rest_api(&mut self, listener: TcpListener) {
        let app = self.app.clone();
        let cancel = self.cancel.clone();

        self.watch_background(async move {
            let router = axum::Router::new()
                .route("/", get(common::homepage))
                .route("/healthz", get(common::healthz))
                .route("/build-version", get(common::build_version))
                .route("/status", get(status::all))
                .route("/status/:label", get(status::single))
                .route("/diagnostics", get(diagnostics::diagnostics))
                .route("/manifest", get(manifest::manifest))
                .with_state(app)
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods([Method::GET, Method::HEAD])
                        .allow_headers([CONTENT_TYPE]),
                );
            tracing::info!("Launching diagnostics server");

            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await?;
            Ok(())
        });
    }
}
