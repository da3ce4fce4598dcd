use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::error::DashboardError;

/// One semi-hourly balance record for a subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub instant: NaiveDateTime,
    pub subsystem: String,
    pub load_mw: Option<f64>,
    pub hydro_mw: f64,
    pub thermal_mw: f64,
    pub wind_mw: f64,
    pub solar_mw: f64,
    pub total_generation_mw: f64,
}

impl Observation {
    pub fn new(
        instant: NaiveDateTime,
        subsystem: impl Into<String>,
        load_mw: Option<f64>,
        hydro_mw: f64,
        thermal_mw: f64,
        wind_mw: f64,
        solar_mw: f64,
    ) -> Self {
        Self {
            instant,
            subsystem: subsystem.into(),
            load_mw,
            hydro_mw,
            thermal_mw,
            wind_mw,
            solar_mw,
            total_generation_mw: hydro_mw + thermal_mw + wind_mw + solar_mw,
        }
    }

    pub fn renewable_mw(&self) -> f64 {
        self.hydro_mw + self.wind_mw + self.solar_mw
    }
}

/// Row shape returned by the balance query (column names from the source table).
#[derive(Debug, Deserialize)]
pub struct BalanceRow {
    #[serde(rename = "din_instante", deserialize_with = "clickhouse_datetime")]
    pub instant: NaiveDateTime,
    #[serde(rename = "nom_subsistema")]
    pub subsystem: String,
    #[serde(rename = "val_carga", default, deserialize_with = "nullable_f64")]
    pub load_mw: Option<f64>,
    #[serde(rename = "geracao_hidraulica", default, deserialize_with = "nullable_f64")]
    pub hydro_mw: Option<f64>,
    #[serde(rename = "geracao_termica", default, deserialize_with = "nullable_f64")]
    pub thermal_mw: Option<f64>,
    #[serde(rename = "geracao_eolica", default, deserialize_with = "nullable_f64")]
    pub wind_mw: Option<f64>,
    #[serde(rename = "geracao_solar", default, deserialize_with = "nullable_f64")]
    pub solar_mw: Option<f64>,
}

impl From<BalanceRow> for Observation {
    // The SQL total is ignored; it is rebuilt from the coalesced components.
    fn from(row: BalanceRow) -> Self {
        Observation::new(
            row.instant,
            row.subsystem,
            row.load_mw,
            row.hydro_mw.unwrap_or(0.0),
            row.thermal_mw.unwrap_or(0.0),
            row.wind_mw.unwrap_or(0.0),
            row.solar_mw.unwrap_or(0.0),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct SubsystemRow {
    #[serde(rename = "nom_subsistema")]
    pub name: String,
}

/// Closed date interval plus a non-empty, ordered subsystem selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub subsystems: Vec<String>,
}

impl AnalysisWindow {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        subsystems: Vec<String>,
    ) -> Result<Self, DashboardError> {
        if subsystems.is_empty() {
            return Err(DashboardError::EmptySelection);
        }
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Ok(Self {
            start,
            end,
            subsystems,
        })
    }
}

fn clickhouse_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw:?}")))
}

// ClickHouse emits Decimal and quoted 64-bit values as strings, so accept both.
fn nullable_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid number {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn balance_row_coalesces_nulls_and_rebuilds_total() {
        let row: BalanceRow = serde_json::from_str(
            r#"{"din_instante":"2024-01-01 00:30:00","nom_subsistema":"SE/CO","val_carga":"41000.5",
                "geracao_hidraulica":30000,"geracao_termica":null,"geracao_eolica":"1200",
                "geracao_solar":null,"geracao_total":99999}"#,
        )
        .unwrap();
        let obs = Observation::from(row);
        assert_eq!(obs.load_mw, Some(41000.5));
        assert_eq!(obs.thermal_mw, 0.0);
        assert_eq!(obs.total_generation_mw, 31200.0);
        assert_eq!(obs.instant, date(2024, 1, 1).and_hms_opt(0, 30, 0).unwrap());
    }

    #[test]
    fn balance_row_accepts_fractional_and_iso_timestamps() {
        for ts in ["2024-01-01 12:00:00.000", "2024-01-01T12:00:00"] {
            let json = format!(r#"{{"din_instante":"{ts}","nom_subsistema":"S","val_carga":null}}"#);
            let row: BalanceRow = serde_json::from_str(&json).unwrap();
            assert_eq!(row.instant, date(2024, 1, 1).and_hms_opt(12, 0, 0).unwrap());
            assert_eq!(row.load_mw, None);
        }
    }

    #[test]
    fn window_rejects_empty_selection() {
        let err = AnalysisWindow::new(date(2024, 1, 1), date(2024, 1, 7), vec![]).unwrap_err();
        assert!(matches!(err, DashboardError::EmptySelection));
    }

    #[test]
    fn window_orders_bounds() {
        let w = AnalysisWindow::new(date(2024, 1, 7), date(2024, 1, 1), vec!["S".into()]).unwrap();
        assert_eq!((w.start, w.end), (date(2024, 1, 1), date(2024, 1, 7)));
    }
}
