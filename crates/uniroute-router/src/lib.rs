pub mod cost;
pub mod engine;
pub mod health;
pub mod http;
pub mod latency;
pub mod routing;

pub use cost::{CostCalculator, Price};
pub use engine::{RouteError, RouteOutcome, Router};
pub use health::HealthCache;
pub use http::{gateway_router, strategy_by_name, GatewayError, RouterHttpState};
pub use latency::{LatencyStats, LatencyTracker};
pub use routing::{
    CostBasedStrategy, CustomStrategy, LatencyBasedStrategy, LoadBalancedStrategy,
    ModelBasedStrategy, RoutingStrategy,
};
