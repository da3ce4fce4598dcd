use chrono::NaiveDate;
use thiserror::Error;

/// Failures while opening the ClickHouse connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("missing setting {0}")]
    MissingSetting(&'static str),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("building HTTP client failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("server rejected connection (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Failures while running a query on an open connection.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("could not decode row {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything that halts a render pass.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error("no subsystems available")]
    EmptyCatalog,

    #[error("no subsystem selected")]
    EmptySelection,

    #[error("no rows between {start} and {end}")]
    EmptyResult { start: NaiveDate, end: NaiveDate },
}

impl DashboardError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DashboardError::Connection(_) => "connection_error",
            DashboardError::Query(_) => "query_error",
            DashboardError::EmptyCatalog => "empty_catalog",
            DashboardError::EmptySelection => "empty_selection",
            DashboardError::EmptyResult { .. } => "empty_result",
        }
    }

    /// Inline message shown on the page.
    pub fn user_message(&self) -> String {
        match self {
            DashboardError::Connection(err) => format!("Erro na conexão com ClickHouse: {err}"),
            DashboardError::Query(err) => format!("Erro na consulta: {err}"),
            DashboardError::EmptyCatalog => "Não foi possível carregar os subsistemas".to_string(),
            DashboardError::EmptySelection => {
                "Selecione pelo menos um subsistema para visualizar os dados".to_string()
            }
            DashboardError::EmptyResult { .. } => {
                "Nenhum dado encontrado para o período selecionado".to_string()
            }
        }
    }

    /// Selection and empty-window halts are user-correctable and render as warnings.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DashboardError::EmptySelection | DashboardError::EmptyResult { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_are_only_user_correctable_halts() {
        assert!(DashboardError::EmptySelection.is_warning());
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(DashboardError::EmptyResult { start, end: start }.is_warning());
        assert!(!DashboardError::EmptyCatalog.is_warning());
        assert!(!DashboardError::from(ConnectionError::MissingSetting("CLICKHOUSE_HOST")).is_warning());
    }

    #[test]
    fn connection_message_names_missing_setting() {
        let err = DashboardError::from(ConnectionError::MissingSetting("CLICKHOUSE_PASSWORD"));
        assert_eq!(err.kind(), "connection_error");
        assert!(err.user_message().contains("CLICKHOUSE_PASSWORD"));
    }
}
