use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::models::OptimizedDashboardOverview;
use crate::repository::{HybridRepository, RepositoryError};

/// Selection and last loaded dashboard for one viewer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub year: i32,
    pub month: u32,
    pub group: Option<String>,
    pub overview: Option<OptimizedDashboardOverview>,
    pub subjects: Vec<String>,
    pub groups: Vec<String>,
    /// Stays set until `clear_error` is called.
    pub error: Option<String>,
}

/// Handed out by `begin_load`; only the newest ticket may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

pub struct Loaded {
    pub overview: OptimizedDashboardOverview,
    pub subjects: Vec<String>,
    pub groups: Vec<String>,
}

pub struct DashboardSession {
    repository: Arc<HybridRepository>,
    state: Mutex<DashboardState>,
    generation: AtomicU64,
}

impl DashboardSession {
    pub fn new(repository: Arc<HybridRepository>, year: i32, month: u32) -> Self {
        Self {
            repository,
            state: Mutex::new(DashboardState {
                year,
                month,
                ..DashboardState::default()
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> DashboardState {
        self.state.lock().await.clone()
    }

    pub async fn select(&self, year: i32, month: u32, group: Option<String>) {
        let mut state = self.state.lock().await;
        state.year = year;
        state.month = month;
        state.group = group;
    }

    pub async fn clear_error(&self) {
        self.state.lock().await.error = None;
    }

    pub fn begin_load(&self) -> LoadTicket {
        LoadTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Publishes a load result. Returns `false` and leaves the state untouched
    /// when a newer load has started since `ticket` was issued.
    pub async fn finish_load(
        &self,
        ticket: LoadTicket,
        result: Result<Loaded, RepositoryError>,
    ) -> bool {
        let mut state = self.state.lock().await;
        if ticket.0 != self.generation.load(Ordering::SeqCst) {
            tracing::debug!(ticket = ticket.0, "discarding stale dashboard load");
            return false;
        }

        match result {
            Ok(loaded) => {
                state.overview = Some(loaded.overview);
                state.subjects = loaded.subjects;
                state.groups = loaded.groups;
            }
            Err(e) => {
                tracing::error!(error = %e, "dashboard load failed");
                state.error = Some(e.to_string());
            }
        }
        true
    }

    /// Loads the dashboard for the current selection.
    pub async fn load(&self) -> bool {
        let (year, month, group) = {
            let state = self.state.lock().await;
            (state.year, state.month, state.group.clone())
        };
        let ticket = self.begin_load();

        let (overview, (subjects, groups)) = tokio::join!(
            self.repository.dashboard_overview(year, month, group.as_deref()),
            self.repository.subjects_and_groups(year, month),
        );
        let result = overview.map(|overview| Loaded {
            overview,
            subjects,
            groups,
        });

        self.finish_load(ticket, result).await
    }

    /// Drops cached pre-aggregated data, then loads again.
    pub async fn refresh(&self) -> bool {
        self.repository.clear_cache();
        self.load().await
    }
}
