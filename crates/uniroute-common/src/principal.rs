//! The authenticated identity threaded from `Auth` (spec §4.7) through the
//! gateway middleware stack into the router and accounting sink, via an
//! axum request extension.

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub api_key_id: Option<i64>,
    pub trace_id: String,
}

impl Principal {
    pub fn new(user_id: i64, api_key_id: Option<i64>, trace_id: impl Into<String>) -> Self {
        Self {
            user_id,
            api_key_id,
            trace_id: trace_id.into(),
        }
    }
}
