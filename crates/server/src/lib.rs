//! Depot distribution node: HTTP surface over the cache core.

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
