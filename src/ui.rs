//! Server-rendered dashboard page. The sidebar is a plain GET form, so every
//! change is a fresh request and a fresh render pass. Plotly draws the chart.

use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::error::DashboardError;
use crate::view::{DashboardView, RenderPass, Sidebar};

const PAGE_TITLE: &str = "Dashboard ONS - Balanço Energético";
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const FAVICON: &str = "data:image/svg+xml,<svg xmlns=%22http://www.w3.org/2000/svg%22 viewBox=%220 0 100 100%22><text y=%22.9em%22 font-size=%2290%22>⚡</text></svg>";

const STYLE: &str = r#"
    :root { --bg: #f6f8fb; --card: #fff; --border: #e3e8f0; --text: #111827; --muted: #6b7280; --accent: #2563eb; }
    * { box-sizing: border-box; }
    body { font-family: "Inter", system-ui, -apple-system, sans-serif; margin: 0; background: var(--bg); color: var(--text); display: flex; min-height: 100vh; }
    aside { width: 280px; padding: 1.5rem; background: #fff; border-right: 1px solid var(--border); }
    aside h2 { font-size: 1.1rem; margin: 0 0 1rem; }
    aside label { display: block; margin-top: 0.75rem; font-weight: 600; font-size: 0.9rem; }
    aside input, aside select { width: 100%; padding: 0.45rem; border: 1px solid var(--border); border-radius: 8px; margin-top: 0.25rem; }
    aside select { min-height: 9rem; }
    aside button { margin-top: 1rem; width: 100%; padding: 0.55rem; border: none; border-radius: 8px; background: var(--accent); color: #fff; font-weight: 600; cursor: pointer; }
    main { flex: 1; padding: 1.5rem 2rem; max-width: 1400px; }
    h1 { margin: 0 0 0.25rem; font-size: 1.6rem; }
    .sub { color: var(--muted); margin: 0 0 1rem; }
    .metrics { display: grid; grid-template-columns: repeat(4, 1fr); gap: 1rem; }
    .metric { background: var(--card); border: 1px solid var(--border); border-radius: 12px; padding: 1rem; }
    .metric .label { color: var(--muted); font-size: 0.9rem; }
    .metric .value { font-size: 1.7rem; font-weight: 600; margin-top: 0.25rem; }
    .alert { padding: 0.9rem 1rem; border-radius: 10px; margin: 1rem 0; }
    .alert.error { background: #fff0f0; border: 1px solid #f1b9b9; }
    .alert.warning { background: #fffbe8; border: 1px solid #f1e3b9; }
    .alert.info { background: #eef5ff; border: 1px solid #c4d8f5; }
    details { background: var(--card); border: 1px solid var(--border); border-radius: 12px; padding: 0.75rem 1rem; }
    table { width: 100%; border-collapse: collapse; font-size: 0.95rem; margin-top: 0.5rem; }
    th, td { padding: 0.35rem 0.5rem; text-align: right; border-bottom: 1px solid var(--border); }
    th:first-child, td:first-child { text-align: left; }
    .footer { text-align: center; color: #666; font-size: 0.9rem; }
"#;

pub fn render_page(pass: &RenderPass) -> String {
    html! {
        (DOCTYPE)
        html lang="pt-BR" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (PAGE_TITLE) }
                link rel="icon" href=(FAVICON);
                script src=(PLOTLY_CDN) {}
                style { (PreEscaped(STYLE)) }
            }
            body {
                @if let Some(sidebar) = &pass.sidebar {
                    (render_sidebar(sidebar))
                }
                main {
                    h1 { "⚡ Dashboard Balanço Energético ONS" }
                    p class="sub" { b { "Sistema Elétrico Brasileiro - Dados Semi-horários" } }
                    @match &pass.outcome {
                        Ok(view) => { (render_view(view)) }
                        Err(err) => { (render_halt(err)) }
                    }
                    hr;
                    div class="footer" { "Dashboard ONS - Sistema Elétrico Brasileiro | Dados do ClickHouse Cloud" }
                }
            }
        }
    }
    .into_string()
}

fn render_sidebar(sidebar: &Sidebar) -> Markup {
    html! {
        aside {
            h2 { "📊 Filtros" }
            form method="get" action="/" {
                input type="hidden" name="submitted" value="1";
                label for="start" { "Período de Análise:" }
                input id="start" type="date" name="start" value=(sidebar.start.format("%Y-%m-%d").to_string());
                input id="end" type="date" name="end" value=(sidebar.end.format("%Y-%m-%d").to_string());
                label for="subsystem" { "Subsistemas:" }
                select id="subsystem" name="subsystem" multiple {
                    @for name in &sidebar.catalog {
                        option value=(name) selected[sidebar.selected.contains(name)] { (name) }
                    }
                }
                button type="submit" { "Aplicar" }
            }
        }
    }
}

fn render_halt(err: &DashboardError) -> Markup {
    let class = if err.is_warning() { "warning" } else { "error" };
    html! {
        div class={ "alert " (class) } { (err.user_message()) }
        @if matches!(err, DashboardError::Connection(_)) {
            div class="alert info" {
                "Configure as credenciais em secrets.yaml ou nas variáveis de ambiente CLICKHOUSE_*"
            }
        }
    }
}

fn render_view(view: &DashboardView) -> Markup {
    let m = &view.metrics;
    let cards = [
        ("Energia Total", format!("{} MWh", format_thousands(m.total_energy_mwh))),
        ("Demanda Média", format!("{} MW", format_thousands(m.mean_demand_mw))),
        ("Pico de Demanda", format!("{} MW", format_thousands(m.peak_demand_mw))),
        ("Renovável", format!("{:.1}%", m.renewable_pct)),
    ];
    // A literal `</` inside the JSON would close the script element early.
    let figure = view.chart.to_string().replace("</", "<\\/");
    html! {
        div class="metrics" {
            @for (label, value) in &cards {
                div class="metric" {
                    div class="label" { (label) }
                    div class="value" { (value) }
                }
            }
        }
        hr;
        h2 { "📈 Curva de Carga por Subsistema" }
        div id="chart" {}
        script {
            (PreEscaped(format!(
                "const FIGURE = {figure};\nPlotly.newPlot('chart', FIGURE.data, FIGURE.layout, {{ responsive: true }});"
            )))
        }
        (render_details(view))
    }
}

fn render_details(view: &DashboardView) -> Markup {
    let w = &view.window;
    html! {
        details {
            summary { "ℹ️ Informações dos Dados" }
            p { b { "Período:" } " " (w.start.format("%d/%m/%Y").to_string()) " a " (w.end.format("%d/%m/%Y").to_string()) }
            p { b { "Subsistemas:" } " " (w.subsystems.join(", ")) }
            p { b { "Total de registros:" } " " (format_thousands(view.row_count as f64)) }
            p { b { "Frequência:" } " Dados semi-horários" }
            p { b { "Estatísticas por Subsistema:" } }
            table {
                tr {
                    th { "Subsistema" }
                    th { "Média (MW)" }
                    th { "Máximo (MW)" }
                    th { "Mínimo (MW)" }
                    th { "Desvio Padrão" }
                }
                @for s in &view.stats {
                    tr {
                        td { (s.subsystem) }
                        td { (format!("{:.1}", s.mean_mw)) }
                        td { (format!("{:.1}", s.max_mw)) }
                        td { (format!("{:.1}", s.min_mw)) }
                        td {
                            @match s.std_dev_mw {
                                Some(v) => { (format!("{v:.1}")) }
                                None => { "—" }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Rounds to an integer and groups thousands with commas (`1234567.8` -> `1,234,568`).
pub fn format_thousands(value: f64) -> String {
    if !value.is_finite() {
        return "n/a".to_string();
    }
    let rounded = format!("{:.0}", value.abs());
    let mut grouped = String::with_capacity(rounded.len() + rounded.len() / 3);
    for (i, ch) in rounded.chars().enumerate() {
        if i > 0 && (rounded.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0.0 && rounded != "0" {
        grouped.insert(0, '-');
    }
    grouped
}
