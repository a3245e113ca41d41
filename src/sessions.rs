use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::fetcher::CarFetcher;
use crate::listing::{FetchRequest, ListingController};

/// Shared handle to one session's controller
pub type SharedController = Arc<Mutex<ListingController>>;

struct SessionEntry {
    controller: SharedController,
    last_used: Instant,
}

/// In-memory listing sessions, one controller per browsing client.
///
/// Sessions untouched for longer than the TTL are dropped.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Create a new session and return its id and controller
    pub async fn create(&self) -> (Uuid, SharedController) {
        let id = Uuid::new_v4();
        let controller = Arc::new(Mutex::new(ListingController::new()));
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            SessionEntry {
                controller: controller.clone(),
                last_used: Instant::now(),
            },
        );
        (id, controller)
    }

    /// Get a live session's controller and mark it used
    pub async fn get(&self, id: &Uuid) -> Option<SharedController> {
        let mut sessions = self.sessions.write().await;
        let expired = sessions.get(id)?.last_used.elapsed() >= self.ttl;
        if expired {
            sessions.remove(id);
            return None;
        }
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.controller.clone())
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop expired sessions, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() < self.ttl);
        before - sessions.len()
    }

    // Periodically sweeps expired sessions for the lifetime of the process
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = store.cleanup_expired().await;
                if removed > 0 {
                    let remaining = store.len().await;
                    tracing::info!(removed, remaining, "Dropped idle listing sessions");
                }
            }
        })
    }
}

/// Runs one controller operation end to end: `begin` under the lock, the
/// fetch without it, then `complete` under the lock again.
///
/// The fetch and `complete` run on their own task, so a caller dropped
/// mid-fetch (client disconnect) still lets the response land.
///
/// Returns false when `begin` declined to fetch or the response was stale.
pub async fn drive<F>(controller: &SharedController, fetcher: &Arc<dyn CarFetcher>, begin: F) -> bool
where
    F: FnOnce(&mut ListingController) -> Option<FetchRequest>,
{
    let request = {
        let mut guard = controller.lock().await;
        begin(&mut guard)
    };
    let Some(request) = request else {
        return false;
    };
    let generation = request.generation;

    let task = {
        let controller = controller.clone();
        let fetcher = fetcher.clone();
        tokio::spawn(async move {
            let result = fetcher
                .fetch(&request.filters, &request.search_text, request.page)
                .await;
            controller.lock().await.complete(request, result)
        })
    };

    match task.await {
        Ok(applied) => applied,
        Err(e) => {
            tracing::error!(generation, "Listing fetch task failed: {}", e);
            controller.lock().await.abandon(generation);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::testing::StubFetcher;
    use crate::filters::FilterOption;
    use crate::models::{Car, CarPage, FilterClause, Pagination};
    use axum::async_trait;

    fn shared() -> SharedController {
        Arc::new(Mutex::new(ListingController::new()))
    }

    // Answers every fetch with one car after a delay
    struct SlowFetcher {
        delay: Duration,
        id: &'static str,
    }

    #[async_trait]
    impl CarFetcher for SlowFetcher {
        async fn fetch(&self, _filters: &[FilterClause], _search_text: &str, _page: u32) -> Result<CarPage, FetchError> {
            tokio::time::sleep(self.delay).await;
            Ok(CarPage {
                cars: vec![Car { id: self.id.to_string(), ..Default::default() }],
                pagination: Pagination { has_more: true },
            })
        }
    }

    #[tokio::test]
    async fn create_get_remove() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.create().await;
        assert!(store.get(&id).await.is_some());
        assert_eq!(store.len().await, 1);
        assert!(store.remove(&id).await);
        assert!(store.get(&id).await.is_none());
        assert!(!store.remove(&id).await);
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::ZERO);
        let (id, _) = store.create().await;
        store.create().await;
        assert!(store.get(&id).await.is_none(), "Expired session should return None");
        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn drive_runs_initial_load_then_pages() {
        let stub = Arc::new(StubFetcher::new());
        stub.push_page(&["a", "b"], true).push_page(&["c"], false);
        let fetcher: Arc<dyn CarFetcher> = stub.clone();
        let controller = shared();

        assert!(drive(&controller, &fetcher, |c| c.begin_initial_load()).await);
        assert!(drive(&controller, &fetcher, |c| c.begin_load_more()).await);
        // Exhausted: no fetch issued
        assert!(!drive(&controller, &fetcher, |c| c.begin_load_more()).await);

        let calls = stub.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].page, 1);
        assert_eq!(calls[1].page, 2);
        assert_eq!(calls[0].filters, vec![FilterClause::approved_only()]);

        let guard = controller.lock().await;
        let ids: Vec<&str> = guard.cars().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn drive_surfaces_fetch_errors_as_notifications() {
        let stub = Arc::new(StubFetcher::new());
        stub.push_error(FetchError::Backend { status: 502 });
        let fetcher: Arc<dyn CarFetcher> = stub;
        let controller = shared();
        controller.lock().await.toggle(FilterOption::Diesel);

        assert!(drive(&controller, &fetcher, |c| c.begin_apply_filters()).await);
        let mut guard = controller.lock().await;
        assert!(!guard.is_loading());
        let notes = guard.take_notifications();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].message.contains("502"));
    }

    #[tokio::test]
    async fn dropped_caller_still_completes_the_fetch() {
        let stub = Arc::new(StubFetcher::new());
        stub.push_page(&["a"], true);
        let fetcher: Arc<dyn CarFetcher> = stub;
        let controller = shared();
        assert!(drive(&controller, &fetcher, |c| c.begin_initial_load()).await);

        let slow: Arc<dyn CarFetcher> = Arc::new(SlowFetcher { delay: Duration::from_millis(50), id: "b" });
        let cut_short = tokio::time::timeout(
            Duration::from_millis(5),
            drive(&controller, &slow, |c| c.begin_load_more()),
        )
        .await;
        assert!(cut_short.is_err(), "drive should still be waiting on the fetch");

        tokio::time::sleep(Duration::from_millis(200)).await;
        {
            let guard = controller.lock().await;
            assert!(!guard.is_loading());
            let ids: Vec<&str> = guard.cars().iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b"]);
            assert_eq!(guard.next_page(), 3);
        }

        // The session is not wedged: the next page is fetched
        assert!(drive(&controller, &slow, |c| c.begin_load_more()).await);
        assert_eq!(controller.lock().await.cars().len(), 3);
    }
}
