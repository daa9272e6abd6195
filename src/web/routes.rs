use super::AppState;
use super::handlers::{auth, healthcheck, projects, records, tables};
use axum::{
    Router,
    http::Method,
    routing::{delete, get, post, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/:project",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route(
            "/api/projects/:project/settings",
            put(projects::update_settings),
        )
        .route(
            "/api/projects/:project/rotate-key",
            post(projects::rotate_key),
        )
        .route(
            "/api/projects/:project/keys",
            get(projects::list_keys).post(projects::create_key),
        )
        .route(
            "/api/projects/:project/keys/:key",
            delete(projects::delete_key),
        )
        .route(
            "/api/projects/:project/keys/:key/deactivate",
            post(projects::deactivate_key),
        )
        .route(
            "/api/projects/:project/tables",
            get(tables::list_tables).post(tables::create_table),
        )
        .route(
            "/api/projects/:project/tables/:table",
            get(tables::get_table).delete(tables::delete_table),
        )
        .route(
            "/api/projects/:project/tables/:table/fields",
            post(tables::add_field).put(tables::replace_fields),
        )
        .route(
            "/api/projects/:project/tables/:table/fields/:field",
            delete(tables::remove_field),
        )
        .route(
            "/api/projects/:project/tables/:table/columns",
            get(tables::table_columns),
        )
        .route(
            "/api/projects/:project/tables/:table/verify",
            get(tables::verify_table),
        )
        .route(
            "/api/projects/:project/tables/:table/records",
            get(records::list_records).post(records::create_record),
        )
        .route(
            "/api/projects/:project/tables/:table/records/:record",
            get(records::get_record)
                .patch(records::update_record)
                .delete(records::delete_record),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
