use std::sync::Arc;

use tracing::error;

use huddle_db::Database;
use huddle_gateway::dispatcher::Dispatcher;

use crate::error::ApiError;
use crate::files::FileStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub files: FileStore,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Run a blocking store call off the async runtime.
    pub async fn db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> huddle_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}
