use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::Observation;

/// Semi-hourly samples per hour; MW summed over samples / 2 = MWh.
pub const SAMPLES_PER_HOUR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub total_energy_mwh: f64,
    pub mean_demand_mw: f64,
    pub peak_demand_mw: f64,
    pub renewable_pct: f64,
}

impl SummaryMetrics {
    /// Computed over every row of the window, all selected subsystems combined.
    /// Null loads are skipped; generation components are already zero-filled.
    pub fn from_observations(rows: &[Observation]) -> Self {
        let loads: Vec<f64> = rows.iter().filter_map(|r| r.load_mw).collect();
        let load_sum: f64 = loads.iter().sum();
        let mean_demand_mw = if loads.is_empty() {
            0.0
        } else {
            load_sum / loads.len() as f64
        };
        let peak_demand_mw = loads.iter().copied().reduce(f64::max).unwrap_or(0.0);

        let renewable: f64 = rows.iter().map(Observation::renewable_mw).sum();
        let generation: f64 = rows.iter().map(|r| r.total_generation_mw).sum();
        let renewable_pct = if generation > 0.0 {
            (renewable / generation * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Self {
            total_energy_mwh: load_sum / SAMPLES_PER_HOUR,
            mean_demand_mw,
            peak_demand_mw,
            renewable_pct,
        }
    }
}

/// Load descriptive statistics for one subsystem, rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemStats {
    pub subsystem: String,
    pub mean_mw: f64,
    pub max_mw: f64,
    pub min_mw: f64,
    /// Sample standard deviation; undefined below two samples.
    pub std_dev_mw: Option<f64>,
}

/// Per-subsystem statistics ordered by subsystem name. Subsystems whose loads
/// are all null are left out.
pub fn subsystem_stats(rows: &[Observation]) -> Vec<SubsystemStats> {
    let mut grouped: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let Some(load) = row.load_mw {
            grouped.entry(row.subsystem.as_str()).or_default().push(load);
        }
    }

    grouped
        .into_iter()
        .map(|(subsystem, loads)| {
            let n = loads.len() as f64;
            let mean = loads.iter().sum::<f64>() / n;
            let max = loads.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = loads.iter().copied().fold(f64::INFINITY, f64::min);
            let std_dev = (loads.len() > 1).then(|| {
                let var = loads.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                round1(var.sqrt())
            });
            SubsystemStats {
                subsystem: subsystem.to_string(),
                mean_mw: round1(mean),
                max_mw: round1(max),
                min_mw: round1(min),
                std_dev_mw: std_dev,
            }
        })
        .collect()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round_ties_even() / 10.0
}
