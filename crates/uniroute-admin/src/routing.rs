//! `/admin/routing/strategy` (spec §6, §4.2 "selected at runtime by admin
//! call"). `custom` is named in the spec's strategy set but can't be built
//! from a JSON body — it requires a Rust closure predicate — so it's
//! accepted by `GET` (if ever set some other way) but rejected by `POST`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uniroute_router::strategy_by_name;

use crate::state::AdminState;

#[derive(Serialize)]
struct StrategyResponse {
    strategy: String,
}

pub async fn get_strategy(State(state): State<AdminState>) -> Json<StrategyResponse> {
    Json(StrategyResponse { strategy: state.app.router.strategy_name().to_string() })
}

#[derive(Deserialize)]
pub struct SetStrategyRequest {
    strategy: String,
}

pub async fn set_strategy(State(state): State<AdminState>, Json(body): Json<SetStrategyRequest>) -> Response {
    if body.strategy == "custom" {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_strategy",
                "message": "custom strategies require a native predicate and can't be set over HTTP",
            })),
        )
            .into_response();
    }

    match strategy_by_name(&body.strategy, state.app.router.cost.clone(), state.app.router.latency.clone()) {
        Some(strategy) => {
            state.app.router.set_strategy(strategy);
            Json(StrategyResponse { strategy: state.app.router.strategy_name().to_string() }).into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid_strategy", "message": "unknown strategy name" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uniroute_router::{CostCalculator, LatencyTracker};

    use super::*;

    #[test]
    fn every_named_strategy_except_custom_resolves() {
        let cost = Arc::new(CostCalculator::new());
        let latency = Arc::new(LatencyTracker::new());
        for name in ["model", "cost", "latency", "balanced", "load_balanced"] {
            assert!(
                strategy_by_name(name, cost.clone(), latency.clone()).is_some(),
                "expected {name} to resolve"
            );
        }
    }

    #[test]
    fn custom_and_unknown_names_do_not_resolve_over_http() {
        let cost = Arc::new(CostCalculator::new());
        let latency = Arc::new(LatencyTracker::new());
        assert!(strategy_by_name("custom", cost.clone(), latency.clone()).is_none());
        assert!(strategy_by_name("nonexistent", cost, latency).is_none());
    }
}
