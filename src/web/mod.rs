//! UPnP web surface: device description, SOAP control, GENA eventing
//! and media resource serving.

pub mod cds;
pub mod didl;
pub mod handlers;
pub mod mrreg;
pub mod soap;

use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};

use crate::runtime::Runtime;

pub fn create_router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/", get(handlers::root_handler))
        .route("/description.xml", get(handlers::description_handler))
        .route("/ContentDirectory.xml", get(handlers::cds_scpd_handler))
        .route("/ConnectionManager.xml", get(handlers::cm_scpd_handler))
        .route(
            "/MediaReceiverRegistrar.xml",
            get(handlers::mrreg_scpd_handler),
        )
        .route("/control/{service}", post(handlers::control_handler))
        .route("/event/{service}", any(handlers::event_handler))
        .route("/content/media", get(handlers::serve_media))
        .with_state(runtime)
}
