use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    auth::{AdminUser, AuthenticatedUser},
    state::AppState,
};

pub mod admin;
pub mod auth;
pub mod health;
pub mod payments;
pub mod tasks;
pub mod tickets;
pub mod uploads;
pub mod users;
pub mod workrooms;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    warn!(origin = %value, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/users/:slug", get(users::get_public_profile))
        .route("/api/help/faq", get(tickets::list_faq))
        .route("/api/workrooms/:id/ws", get(workrooms::workroom_socket));

    let users_routes = Router::new()
        .route("/me", get(users::get_me).patch(users::update_me))
        .route("/me/projects", post(users::add_project))
        .route("/me/projects/:id", delete(users::delete_project));

    // GET on "/" and "/:id" is served by the public router.
    let tasks_routes = Router::new()
        .route("/", post(tasks::create_task))
        .route(
            "/:id",
            patch(tasks::update_task).delete(tasks::delete_task),
        )
        .route(
            "/:id/apply",
            post(tasks::apply_to_task).delete(tasks::withdraw_application),
        )
        .route("/:id/applicants", get(tasks::list_applicants))
        .route("/mine/posted", get(tasks::list_my_posted))
        .route("/mine/applied", get(tasks::list_my_applied));

    let payments_routes = Router::new()
        .route("/orders", post(payments::create_order))
        .route("/verify", post(payments::verify_payment));

    let workrooms_routes = Router::new()
        .route("/:id", get(workrooms::get_workroom))
        .route(
            "/:id/messages",
            get(workrooms::list_messages).post(workrooms::post_message),
        )
        .route("/:id/finalise", post(workrooms::finalise))
        .route("/:id/payout", post(workrooms::request_payout));

    let tickets_routes = Router::new()
        .route(
            "/",
            get(tickets::list_my_tickets).post(tickets::create_ticket),
        )
        .route("/:id", get(tickets::get_ticket))
        .route("/:id/comments", post(tickets::add_comment));

    let admin_routes = Router::new()
        .route("/stats", get(admin::stats))
        .route("/users", get(admin::list_users))
        .route(
            "/users/:id",
            patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/tasks", get(admin::list_tasks))
        .route(
            "/tasks/:id",
            patch(admin::moderate_task).delete(admin::delete_task),
        )
        .route("/payments", get(admin::list_payment_logs))
        .route("/payments/:id", patch(admin::update_payment_log))
        .route("/tickets", get(tickets::admin_list_tickets))
        .route(
            "/tickets/:id",
            patch(tickets::admin_update_ticket).delete(tickets::admin_delete_ticket),
        )
        .layer(middleware::from_extractor_with_state::<AdminUser, _>(
            state.clone(),
        ));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/tasks", tasks_routes)
        .nest("/api/payments", payments_routes)
        .nest("/api/workrooms", workrooms_routes)
        .nest("/api/tickets", tickets_routes)
        .route("/api/uploads", post(uploads::upload_attachment))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/admin", admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(uploads::MAX_UPLOAD_BYTES + 1024 * 1024))
}
