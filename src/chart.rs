//! Load curve figure, built with the `plotly` crate. The browser only calls
//! `Plotly.newPlot` with the serialized `data` and `layout`.

use plotly::{
    Layout, Plot, Scatter,
    common::{Anchor, Line, Mode, Orientation, Title},
    layout::{Axis, HoverMode, Legend},
};

use crate::models::Observation;

/// Plotly's qualitative Set1 palette.
pub const SET1: [&str; 9] = [
    "rgb(228,26,28)",
    "rgb(55,126,184)",
    "rgb(77,175,74)",
    "rgb(152,78,163)",
    "rgb(255,127,0)",
    "rgb(255,255,51)",
    "rgb(166,86,40)",
    "rgb(247,129,191)",
    "rgb(153,153,153)",
];

const GRID_COLOR: &str = "lightgray";

// The trace name is read by Plotly itself, so labels never enter the markup.
const HOVER_TEMPLATE: &str =
    "<b>%{fullData.name}</b><br>Data: %{x}<br>Carga: %{y:,.0f} MW<extra></extra>";

pub fn color_for(index: usize) -> &'static str {
    SET1[index % SET1.len()]
}

fn grid_axis(title: &str) -> Axis {
    Axis::new()
        .title(Title::with_text(title))
        .show_grid(true)
        .grid_width(1)
        .grid_color(GRID_COLOR)
}

/// One line per selected subsystem, in selection order. A subsystem with no
/// rows draws nothing but still consumes its palette slot.
pub fn load_curve(selected: &[String], rows: &[Observation]) -> Plot {
    let mut plot = Plot::new();
    for (i, subsystem) in selected.iter().enumerate() {
        let points: Vec<&Observation> = rows.iter().filter(|r| &r.subsystem == subsystem).collect();
        if points.is_empty() {
            continue;
        }
        let instants: Vec<String> = points
            .iter()
            .map(|r| r.instant.format("%Y-%m-%d %H:%M:%S").to_string())
            .collect();
        let load: Vec<Option<f64>> = points.iter().map(|r| r.load_mw).collect();

        let trace = Scatter::new(instants, load)
            .name(subsystem.as_str())
            .mode(Mode::Lines)
            .line(Line::new().color(color_for(i)).width(2.0))
            .hover_template(HOVER_TEMPLATE);
        plot.add_trace(trace);
    }

    let layout = Layout::new()
        .title(Title::with_text("Demanda por Subsistema (MW)"))
        .height(500)
        .hover_mode(HoverMode::XUnified)
        .show_legend(true)
        .legend(
            Legend::new()
                .orientation(Orientation::Horizontal)
                .y_anchor(Anchor::Bottom)
                .y(1.02)
                .x_anchor(Anchor::Right)
                .x(1.0),
        )
        .x_axis(grid_axis("Data/Hora"))
        .y_axis(grid_axis("Carga (MW)"));
    plot.set_layout(layout);
    plot
}

/// The figure as a JSON value (`data`, `layout`, `config`) for the page and the API.
pub fn figure_json(plot: &Plot) -> serde_json::Value {
    serde_json::from_str(&plot.to_json()).unwrap_or_else(|err| {
        tracing::warn!(%err, "plotly figure did not round-trip as json");
        serde_json::Value::Null
    })
}
