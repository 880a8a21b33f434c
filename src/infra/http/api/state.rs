use std::sync::Arc;

use crate::application::feed::FeedOrchestrator;
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct ApiState {
    pub feed: Arc<FeedOrchestrator>,
    /// Absent when the engine runs over the in-memory stores.
    pub db: Option<Arc<PostgresRepositories>>,
}

impl ApiState {
    pub fn new(feed: Arc<FeedOrchestrator>, db: Option<Arc<PostgresRepositories>>) -> Self {
        Self { feed, db }
    }
}
