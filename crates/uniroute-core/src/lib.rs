pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod gateway;
pub mod ratelimit;
pub mod state;

pub use bootstrap::{bootstrap, bootstrap_from_env, Bootstrap, CliArgs};
pub use error::CoreError;
pub use gateway::build_gateway_router;
pub use ratelimit::{CounterBackend, InMemoryCounterBackend, Window};
pub use state::AppState;
