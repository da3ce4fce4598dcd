//! SQL for the two reads the dashboard makes against `balanco_energia_subsistemas`.

use std::collections::BTreeSet;

use crate::cache::ResultCache;
use crate::clickhouse::{DataSource, Query};
use crate::error::DashboardError;
use crate::models::{AnalysisWindow, BalanceRow, Observation, SubsystemRow};

pub const BALANCE_TABLE: &str = "balanco_energia_subsistemas";

pub fn subsystems_query() -> Query {
    Query::new(format!(
        r#"
        SELECT DISTINCT nom_subsistema
        FROM {BALANCE_TABLE}
        WHERE nom_subsistema != ''
        ORDER BY nom_subsistema
        "#
    ))
}

/// Load plus the four generation sources, null-coalesced and summed into a total.
pub fn balance_query(window: &AnalysisWindow) -> Query {
    Query::new(format!(
        r#"
        SELECT
            din_instante,
            nom_subsistema,
            val_carga,
            COALESCE(val_gerhidraulica, 0) AS geracao_hidraulica,
            COALESCE(val_gertermica, 0) AS geracao_termica,
            COALESCE(val_gereolica, 0) AS geracao_eolica,
            COALESCE(val_gersolar, 0) AS geracao_solar,
            (COALESCE(val_gerhidraulica, 0) + COALESCE(val_gertermica, 0) +
             COALESCE(val_gereolica, 0) + COALESCE(val_gersolar, 0)) AS geracao_total
        FROM {BALANCE_TABLE}
        WHERE
            data_ref >= {{start:Date}}
            AND data_ref <= {{end:Date}}
            AND has({{subsystems:Array(String)}}, nom_subsistema)
        ORDER BY din_instante, nom_subsistema
        "#
    ))
    .bind_date("start", window.start)
    .bind_date("end", window.end)
    .bind_str_array("subsystems", &window.subsystems)
}

/// Distinct non-empty subsystem labels, ascending. An empty catalog halts the view.
pub async fn list_subsystems<D: DataSource>(
    cache: &ResultCache,
    source: &D,
) -> Result<Vec<String>, DashboardError> {
    let result = cache.cached_execute(source, &subsystems_query()).await?;
    let names: BTreeSet<String> = result
        .rows::<SubsystemRow>()?
        .into_iter()
        .map(|row| row.name)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return Err(DashboardError::EmptyCatalog);
    }
    Ok(names.into_iter().collect())
}

/// Observations for the window. No rows halts the view with `EmptyResult`.
pub async fn fetch_observations<D: DataSource>(
    cache: &ResultCache,
    source: &D,
    window: &AnalysisWindow,
) -> Result<Vec<Observation>, DashboardError> {
    let result = cache.cached_execute(source, &balance_query(window)).await?;
    let rows: Vec<Observation> = result
        .rows::<BalanceRow>()?
        .into_iter()
        .map(Observation::from)
        .collect();
    if rows.is_empty() {
        return Err(DashboardError::EmptyResult {
            start: window.start,
            end: window.end,
        });
    }
    Ok(rows)
}
