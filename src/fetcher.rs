// The remote filtered-fetch operation the listing controller is driven against

use axum::async_trait;

use crate::error::FetchError;
use crate::models::{CarPage, FilterClause};

#[async_trait]
pub trait CarFetcher: Send + Sync {
    /// Fetches one page (1-based) of cars matching every clause and the free search text.
    async fn fetch(&self, filters: &[FilterClause], search_text: &str, page: u32) -> Result<CarPage, FetchError>;
}
