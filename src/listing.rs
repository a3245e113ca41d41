//! Listing controller: search text, filter toggles, pagination cursor and the
//! loaded car list for one browsing session.
//!
//! The controller does no I/O. Every fetch-issuing operation is split into a
//! `begin_*` call, which updates state and hands back a [`FetchRequest`], and
//! [`ListingController::complete`], which applies the response. Callers run
//! the actual fetch in between (see `sessions::drive`), so the `loading`
//! window is real and observable.
//!
//! Reset-type queries (search, apply, reset, refresh, initial load) bump a
//! generation counter. A response carrying an older generation is dropped, so
//! a slow answer to a superseded query can never overwrite a newer list.

use serde::Serialize;

use crate::error::FetchError;
use crate::filters::{FilterOption, ToggleSet};
use crate::models::{default_filters, Car, CarPage, FilterClause};

pub const OFFLINE_ACTION_MESSAGE: &str = "You're offline. Please check your internet connection.";
pub const WENT_OFFLINE_MESSAGE: &str = "You are offline. Please check your internet connection.";
pub const BACK_ONLINE_MESSAGE: &str = "You are back online!";
pub const NO_CARS_WITH_FILTERS_MESSAGE: &str = "No cars found with the current filters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

// Non-blocking message for the UI (toast/snackbar)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    InitialLoad,
    Search,
    ApplyFilters,
    ResetFilters,
    Refresh,
    LoadMore,
}

impl QueryKind {
    // Everything except LoadMore starts a new result list
    pub fn replaces_results(self) -> bool {
        !matches!(self, QueryKind::LoadMore)
    }
}

/// Parameters for one call to the remote filtered fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub generation: u64,
    pub kind: QueryKind,
    pub filters: Vec<FilterClause>,
    pub search_text: String,
    pub page: u32,
}

// The query whose pages make up the list currently shown
#[derive(Debug, Clone, PartialEq)]
struct ShownQuery {
    filters: Vec<FilterClause>,
    search_text: String,
}

#[derive(Debug)]
pub struct ListingController {
    cars: Vec<Car>,
    search_term: String,
    active_filters: Vec<FilterClause>,
    toggles: ToggleSet,
    shown: ShownQuery,
    next_page: u32,
    has_more: bool,
    loading: bool,
    refreshing: bool,
    offline: bool,
    generation: u64,
    notifications: Vec<Notification>,
}

impl Default for ListingController {
    fn default() -> Self {
        Self::new()
    }
}

impl ListingController {
    pub fn new() -> Self {
        Self {
            cars: Vec::new(),
            search_term: String::new(),
            active_filters: default_filters(),
            toggles: ToggleSet::default(),
            shown: ShownQuery {
                filters: default_filters(),
                search_text: String::new(),
            },
            next_page: 1,
            has_more: true,
            loading: false,
            refreshing: false,
            offline: false,
            generation: 0,
            notifications: Vec::new(),
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // --- Filter sheet ---

    pub fn toggle(&mut self, option: FilterOption) -> bool {
        self.toggles.toggle(option)
    }

    pub fn selected_count(&self) -> usize {
        self.toggles.selected_count()
    }

    pub fn apply_enabled(&self) -> bool {
        self.toggles.any_selected()
    }

    // --- Queries ---

    /// First load when the listing screen opens.
    pub fn begin_initial_load(&mut self) -> Option<FetchRequest> {
        self.start_query(QueryKind::InitialLoad)
    }

    /// New search with the current filters. Surrounding whitespace is trimmed.
    /// The text is kept even when the search cannot run (offline) so the
    /// input is not lost.
    pub fn begin_search(&mut self, text: &str) -> Option<FetchRequest> {
        self.search_term = text.trim().to_string();
        self.start_query(QueryKind::Search)
    }

    /// Replaces the active filter with the default status clause plus the
    /// clauses derived from the toggles. Nothing happens with no toggle set.
    pub fn begin_apply_filters(&mut self) -> Option<FetchRequest> {
        if !self.apply_enabled() {
            tracing::debug!("Apply requested with no filter selected, ignoring.");
            return None;
        }
        if !self.ensure_online() {
            return None;
        }
        let mut filters = default_filters();
        filters.extend(self.toggles.to_clauses());
        self.active_filters = filters;
        self.start_query(QueryKind::ApplyFilters)
    }

    /// RESET on the filter sheet: clears toggles, restores the default filter, keeps the search text.
    pub fn begin_reset_filters(&mut self) -> Option<FetchRequest> {
        self.toggles.clear();
        self.active_filters = default_filters();
        self.start_query(QueryKind::ResetFilters)
    }

    /// Pull-to-refresh: clears search text and toggles, restores the default filter, refetches.
    pub fn begin_refresh(&mut self) -> Option<FetchRequest> {
        self.search_term.clear();
        self.toggles.clear();
        self.active_filters = default_filters();
        let request = self.start_query(QueryKind::Refresh);
        self.refreshing = request.is_some();
        request
    }

    /// Next page of the list currently shown. Refused without any state
    /// change while a fetch is in flight or when the last page said there is
    /// nothing more.
    pub fn begin_load_more(&mut self) -> Option<FetchRequest> {
        if self.loading || !self.has_more {
            return None;
        }
        if !self.ensure_online() {
            return None;
        }
        self.loading = true;
        Some(FetchRequest {
            generation: self.generation,
            kind: QueryKind::LoadMore,
            filters: self.shown.filters.clone(),
            search_text: self.shown.search_text.clone(),
            page: self.next_page,
        })
    }

    /// Applies the outcome of a fetch. Returns false when the response belongs
    /// to a superseded query and was dropped.
    pub fn complete(&mut self, request: FetchRequest, result: Result<CarPage, FetchError>) -> bool {
        if request.generation != self.generation {
            tracing::debug!(
                kind = ?request.kind,
                page = request.page,
                stale_generation = request.generation,
                current_generation = self.generation,
                "Dropping response for a superseded query"
            );
            return false;
        }

        self.loading = false;
        self.refreshing = false;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(kind = ?request.kind, page = request.page, error = ?e, "Error fetching cars");
                self.notify(e.to_string(), NotificationKind::Error);
                return true;
            }
        };

        let received = page.cars.len();
        if request.kind.replaces_results() {
            self.cars = page.cars;
            self.shown = ShownQuery {
                filters: request.filters,
                search_text: request.search_text,
            };
            if received == 0 {
                let message = if self.shown.search_text.is_empty() {
                    NO_CARS_WITH_FILTERS_MESSAGE.to_string()
                } else {
                    format!("No cars found matching \"{}\"", self.shown.search_text)
                };
                self.notify(message, NotificationKind::Info);
            }
        } else {
            self.cars.extend(page.cars);
        }
        self.has_more = page.pagination.has_more;
        self.next_page = request.page + 1;

        tracing::debug!(
            kind = ?request.kind,
            page = request.page,
            received,
            total = self.cars.len(),
            has_more = self.has_more,
            "Applied car page"
        );
        true
    }

    /// Clears the in-flight flags of a fetch whose response will never
    /// arrive. Does nothing once a newer query has taken over.
    pub fn abandon(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        tracing::warn!(generation, "Fetch abandoned before it completed");
        self.loading = false;
        self.refreshing = false;
    }

    // --- Connectivity ---

    /// Feeds a connectivity report. Only transitions produce a notification.
    pub fn set_connectivity(&mut self, connected: bool) {
        let was_offline = self.offline;
        self.offline = !connected;

        if !connected && !was_offline {
            self.notify(WENT_OFFLINE_MESSAGE.to_string(), NotificationKind::Warning);
        } else if connected && was_offline {
            self.notify(BACK_ONLINE_MESSAGE.to_string(), NotificationKind::Success);
        }
    }

    pub fn snapshot(&self) -> ListingSnapshot {
        let gaps = self.toggles.spanned_gaps();
        ListingSnapshot {
            cars: self.cars.clone(),
            has_more: self.has_more,
            next_page: self.next_page,
            loading: self.loading,
            refreshing: self.refreshing,
            offline: self.offline,
            search_term: self.search_term.clone(),
            active_filters: self.active_filters.clone(),
            toggles: self.toggles,
            selected_count: self.selected_count(),
            apply_enabled: self.apply_enabled(),
            range_notice: (!gaps.is_empty()).then(|| {
                format!(
                    "Selected {} ranges are combined into one span from the lowest to the highest choice.",
                    gaps.join(" and ")
                )
            }),
            notifications: Vec::new(),
        }
    }

    // --- Internals ---

    fn ensure_online(&mut self) -> bool {
        if self.offline {
            self.notify(OFFLINE_ACTION_MESSAGE.to_string(), NotificationKind::Error);
            return false;
        }
        true
    }

    fn start_query(&mut self, kind: QueryKind) -> Option<FetchRequest> {
        if !self.ensure_online() {
            return None;
        }
        self.generation += 1;
        self.loading = true;
        Some(FetchRequest {
            generation: self.generation,
            kind,
            filters: self.active_filters.clone(),
            search_text: self.search_term.clone(),
            page: 1,
        })
    }

    fn notify(&mut self, message: String, kind: NotificationKind) {
        tracing::info!(kind = ?kind, "{}", message);
        self.notifications.push(Notification { message, kind });
    }
}

// Read access used by the controller tests; the API reads state through `snapshot()`
#[cfg(test)]
impl ListingController {
    pub fn cars(&self) -> &[Car] {
        &self.cars
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn active_filters(&self) -> &[FilterClause] {
        &self.active_filters
    }

    pub fn toggles(&self) -> &ToggleSet {
        &self.toggles
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_notifications(&self) -> &[Notification] {
        &self.notifications
    }
}

/// Serializable view of a controller, returned by the listing API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSnapshot {
    pub cars: Vec<Car>,
    pub has_more: bool,
    pub next_page: u32,
    pub loading: bool,
    pub refreshing: bool,
    pub offline: bool,
    pub search_term: String,
    pub active_filters: Vec<FilterClause>,
    pub toggles: ToggleSet,
    pub selected_count: usize,
    pub apply_enabled: bool,
    pub range_notice: Option<String>,
    pub notifications: Vec<Notification>,
}
