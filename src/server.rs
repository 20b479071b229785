//! HTTP server and routes.

mod handlers;
pub mod middleware;
pub mod ratelimit;
mod state;

pub use middleware::AuthUser;
pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Room left in a book request for the `book` field and multipart framing.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth = from_fn_with_state(state.clone(), middleware::require_auth);

    let book_routes = Router::new()
        .route(
            "/",
            get(handlers::list_books).merge(post(handlers::create_book).route_layer(auth.clone())),
        )
        .route("/bestrating", get(handlers::best_rated_books))
        .route(
            "/{id}",
            get(handlers::get_book).merge(
                put(handlers::update_book)
                    .delete(handlers::delete_book)
                    .route_layer(auth.clone()),
            ),
        )
        .route("/{id}/rating", post(handlers::rate_book).route_layer(auth))
        .layer(DefaultBodyLimit::max(
            state.images.max_bytes() + FORM_OVERHEAD_BYTES,
        ));

    let auth_routes = Router::new()
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/auth", auth_routes)
        .nest("/api/books", book_routes)
        .nest_service("/uploads", ServeDir::new(state.images.dir()))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::global_rate_limit,
        ))
        .layer(from_fn(middleware::cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
