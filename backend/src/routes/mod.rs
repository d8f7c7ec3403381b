use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod automation;
pub mod health;
pub mod leads;
pub mod tasks;
pub mod users;

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = state.config.cors_origins();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let headers: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(headers)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let leads_routes = Router::new()
        .route("/", get(leads::list_leads).post(leads::create_lead))
        .route("/import", post(leads::import_leads))
        .route(
            "/:id",
            get(leads::get_lead)
                .patch(leads::update_lead)
                .delete(leads::delete_lead),
        )
        .route("/:id/status", post(leads::change_status))
        .route("/:id/claim", post(leads::claim_lead))
        .route("/:id/unclaim", post(leads::unclaim_lead))
        .route("/:id/history", get(leads::lead_history));

    let tasks_routes = Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/:id",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/:id/complete", post(tasks::complete_task));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/leads", leads_routes)
        .nest("/api/tasks", tasks_routes)
        .route("/api/users", get(users::list_users))
        .route("/api/automation/sweep", post(automation::run_sweep))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
