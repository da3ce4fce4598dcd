//! Per-request render pass.
//! Every request restarts from the top: connection, subsystem catalog, selection,
//! data window, then metrics and chart. The first failure halts the pass.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::cache::ResultCache;
use crate::chart::{figure_json, load_curve};
use crate::clickhouse::{Connector, DataSource, Query};
use crate::error::{ConnectionError, DashboardError};
use crate::metrics::{SubsystemStats, SummaryMetrics, subsystem_stats};
use crate::models::AnalysisWindow;
use crate::queries::{fetch_observations, list_subsystems};

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_SELECTION_SIZE: usize = 3;

/// Where a render pass currently is; reported when it halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingConnection,
    AwaitingSubsystemSelection,
    Rendering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AwaitingConnection => "awaiting_connection",
            Stage::AwaitingSubsystemSelection => "awaiting_subsystem_selection",
            Stage::Rendering => "rendering",
        };
        f.write_str(name)
    }
}

/// Filter controls as submitted in the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub subsystems: Vec<String>,
    /// Set by the sidebar form; distinguishes "nothing selected" from "first visit".
    pub submitted: bool,
}

impl FilterState {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut state = FilterState::default();
        for (key, value) in pairs {
            match key.as_str() {
                "start" => state.start = parse_date(key, value),
                "end" => state.end = parse_date(key, value),
                "subsystem" => {
                    if !value.is_empty() {
                        state.subsystems.push(value.to_string());
                    }
                }
                "submitted" => state.submitted = true,
                _ => {}
            }
        }
        state
    }

    /// Date bounds with defaults: last seven days, or a single given date for both ends.
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            (Some(day), None) | (None, Some(day)) => (day, day),
            (None, None) => (today - Duration::days(DEFAULT_WINDOW_DAYS), today),
        }
    }

    /// Selection restricted to catalog entries, de-duplicated in order.
    /// A first visit selects the first catalog entries.
    pub fn selection(&self, catalog: &[String]) -> Vec<String> {
        if !self.submitted && self.subsystems.is_empty() {
            return catalog.iter().take(DEFAULT_SELECTION_SIZE).cloned().collect();
        }
        let mut selected: Vec<String> = Vec::new();
        for name in &self.subsystems {
            if catalog.contains(name) && !selected.contains(name) {
                selected.push(name.clone());
            }
        }
        selected
    }
}

fn parse_date(key: &str, value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(err) => {
            tracing::warn!(%key, %value, %err, "ignoring unparseable date filter");
            None
        }
    }
}

/// Resolved sidebar state, available once the catalog is known.
#[derive(Debug, Clone, Serialize)]
pub struct Sidebar {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub catalog: Vec<String>,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub window: AnalysisWindow,
    pub metrics: SummaryMetrics,
    pub chart: serde_json::Value,
    pub row_count: usize,
    pub stats: Vec<SubsystemStats>,
}

#[derive(Debug)]
pub struct RenderPass {
    pub sidebar: Option<Sidebar>,
    pub outcome: Result<DashboardView, DashboardError>,
}

impl RenderPass {
    fn halted(stage: Stage, sidebar: Option<Sidebar>, error: DashboardError) -> Self {
        tracing::warn!(%stage, kind = error.kind(), error = %error, "render pass halted");
        Self {
            sidebar,
            outcome: Err(error),
        }
    }
}

/// Process-wide dashboard: a lazily opened connection plus the result cache.
pub struct Dashboard<C: Connector> {
    connector: C,
    connection: OnceCell<C::Source>,
    cache: ResultCache,
}

impl<C: Connector> Dashboard<C> {
    pub fn new(connector: C, cache: ResultCache) -> Self {
        Self {
            connector,
            connection: OnceCell::new(),
            cache,
        }
    }

    /// Opened once; a failed attempt is retried on the next request.
    pub async fn connection(&self) -> Result<&C::Source, ConnectionError> {
        self.connection
            .get_or_try_init(|| self.connector.connect())
            .await
    }

    pub async fn subsystems(&self) -> Result<Vec<String>, DashboardError> {
        let source = self.connection().await?;
        list_subsystems(&self.cache, source).await
    }

    pub async fn render(&self, filters: &FilterState, today: NaiveDate) -> RenderPass {
        let source = match self.connection().await {
            Ok(source) => source,
            Err(err) => return RenderPass::halted(Stage::AwaitingConnection, None, err.into()),
        };

        let catalog = match list_subsystems(&self.cache, source).await {
            Ok(catalog) => catalog,
            Err(err) => return RenderPass::halted(Stage::AwaitingSubsystemSelection, None, err),
        };

        let (start, end) = filters.date_range(today);
        let selected = filters.selection(&catalog);
        let sidebar = Sidebar {
            start,
            end,
            catalog,
            selected: selected.clone(),
        };

        let window = match AnalysisWindow::new(start, end, selected) {
            Ok(window) => window,
            Err(err) => {
                return RenderPass::halted(Stage::AwaitingSubsystemSelection, Some(sidebar), err);
            }
        };

        let rows = match fetch_observations(&self.cache, source, &window).await {
            Ok(rows) => rows,
            Err(err) => return RenderPass::halted(Stage::Rendering, Some(sidebar), err),
        };

        tracing::info!(
            start = %window.start,
            end = %window.end,
            subsystems = window.subsystems.len(),
            rows = rows.len(),
            "rendering dashboard"
        );
        let view = DashboardView {
            metrics: SummaryMetrics::from_observations(&rows),
            chart: figure_json(&load_curve(&window.subsystems, &rows)),
            row_count: rows.len(),
            stats: subsystem_stats(&rows),
            window,
        };
        RenderPass {
            sidebar: Some(sidebar),
            outcome: Ok(view),
        }
    }

    /// Cheap liveness check used by the health route.
    pub async fn ping(&self) -> Result<(), DashboardError> {
        let source = self.connection().await?;
        source.execute(&Query::new("SELECT 1")).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration as StdDuration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()
    }

    fn dashboard(connector: FakeConnector) -> Dashboard<FakeConnector> {
        Dashboard::new(connector, ResultCache::new(StdDuration::from_secs(300)))
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn filter_defaults_to_last_week_and_first_three() {
        let filters = FilterState::from_pairs(&[]);
        assert_eq!(
            filters.date_range(today()),
            (NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(), today())
        );
        let catalog: Vec<String> = ["N", "NE", "S", "SE"].iter().map(|s| s.to_string()).collect();
        assert_eq!(filters.selection(&catalog), vec!["N", "NE", "S"]);
        assert_eq!(filters.selection(&catalog[..2]), vec!["N", "NE"]);
    }

    #[test]
    fn filter_parses_repeated_subsystems_and_single_date() {
        let filters = FilterState::from_pairs(&pairs(&[
            ("start", "2024-02-10"),
            ("end", "not-a-date"),
            ("subsystem", "SUL"),
            ("subsystem", "XX"),
            ("subsystem", "SUL"),
            ("subsystem", "NORTE"),
            ("submitted", "1"),
        ]));
        let day = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        assert_eq!(filters.date_range(today()), (day, day));
        let catalog = vec!["NORTE".to_string(), "SUL".to_string()];
        assert_eq!(filters.selection(&catalog), vec!["SUL", "NORTE"]);
    }

    #[test]
    fn selected_labels_match_catalog_verbatim() {
        let filters = FilterState::from_pairs(&pairs(&[
            ("subsystem", "SUL "),
            ("subsystem", ""),
            ("submitted", "1"),
        ]));
        assert_eq!(filters.subsystems, vec!["SUL "]);
        let catalog = vec!["NORTE".to_string(), "SUL ".to_string()];
        assert_eq!(filters.selection(&catalog), vec!["SUL "]);
    }

    #[test]
    fn submitted_form_without_subsystems_selects_nothing() {
        let filters = FilterState::from_pairs(&pairs(&[("submitted", "1")]));
        assert!(filters.selection(&["N".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn renders_metrics_chart_and_stats() {
        let balance = [
            balance_line("2024-01-01 00:00:00", "SE/CO", 1000.0, 600.0, 400.0),
            balance_line("2024-01-01 00:30:00", "SE/CO", 2000.0, 600.0, 400.0),
        ]
        .concat();
        let dash = dashboard(FakeConnector::new(vec!["SE/CO", "SUL"], &balance));
        let filters = FilterState::from_pairs(&pairs(&[
            ("start", "2024-01-01"),
            ("end", "2024-01-07"),
            ("subsystem", "SE/CO"),
            ("submitted", "1"),
        ]));

        let pass = dash.render(&filters, today()).await;
        let view = pass.outcome.expect("render should succeed");
        assert_eq!(view.metrics.total_energy_mwh, 1500.0);
        assert_eq!(view.metrics.mean_demand_mw, 1500.0);
        assert_eq!(view.metrics.peak_demand_mw, 2000.0);
        assert!((view.metrics.renewable_pct - 60.0).abs() < 1e-9);
        assert_eq!(view.row_count, 2);
        assert_eq!(view.chart["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(view.stats[0].subsystem, "SE/CO");

        let sidebar = pass.sidebar.unwrap();
        assert_eq!(sidebar.catalog, vec!["SE/CO", "SUL"]);
        assert_eq!(sidebar.selected, vec!["SE/CO"]);
    }

    #[tokio::test]
    async fn empty_selection_issues_no_data_query() {
        let connector = FakeConnector::new(vec!["SUL"], "");
        let recorder = connector.recorder.clone();
        let dash = dashboard(connector);
        let filters = FilterState::from_pairs(&pairs(&[("submitted", "1")]));

        let pass = dash.render(&filters, today()).await;
        assert!(matches!(pass.outcome, Err(DashboardError::EmptySelection)));
        assert!(pass.sidebar.is_some());
        assert_eq!(recorder.data_queries(), 0);
    }

    #[tokio::test]
    async fn empty_catalog_halts_before_data_query() {
        let connector = FakeConnector::new(vec![], "");
        let recorder = connector.recorder.clone();
        let dash = dashboard(connector);

        let pass = dash.render(&FilterState::default(), today()).await;
        assert!(matches!(pass.outcome, Err(DashboardError::EmptyCatalog)));
        assert!(pass.sidebar.is_none());
        assert_eq!(recorder.data_queries(), 0);
    }

    #[tokio::test]
    async fn empty_window_halts_with_empty_result() {
        let dash = dashboard(FakeConnector::new(vec!["SUL"], ""));
        let pass = dash.render(&FilterState::default(), today()).await;
        assert!(matches!(pass.outcome, Err(DashboardError::EmptyResult { .. })));
    }

    #[tokio::test]
    async fn connection_failure_is_retried_next_pass() {
        let connector = FakeConnector::failing();
        let recorder = connector.recorder.clone();
        let dash = dashboard(connector);

        let pass = dash.render(&FilterState::default(), today()).await;
        assert!(matches!(pass.outcome, Err(DashboardError::Connection(_))));
        let _ = dash.render(&FilterState::default(), today()).await;
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connection_is_opened_once_and_catalog_cached() {
        let balance = balance_line("2024-01-01 00:00:00", "SUL", 10.0, 0.0, 0.0);
        let connector = FakeConnector::new(vec!["SUL"], &balance);
        let recorder = connector.recorder.clone();
        let dash = dashboard(connector);

        for _ in 0..3 {
            assert!(dash.render(&FilterState::default(), today()).await.outcome.is_ok());
        }
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
        // One catalog query and one data query; the rest came from the cache.
        assert_eq!(recorder.queries.lock().unwrap().len(), 2);
    }
}
