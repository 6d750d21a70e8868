use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub mod books;
pub mod error;
pub mod orders;
pub mod payments;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(|| async { "ok" }));

    if let Some(service) = state.orders {
        router = router.merge(orders::routes(service));
    }
    if let Some(payments) = state.payments {
        router = router.merge(payments::routes(payments));
    }
    if let Some(books) = state.books {
        router = router.merge(books::routes(books));
    }

    router.layer(TraceLayer::new_for_http())
}
