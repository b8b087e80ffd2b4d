use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

pub const X_AXIS_TITLE: &str = "Spine";
pub const Y_AXIS_TITLE: &str = "Poundage";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Series {
    Original,
    Predicted,
}

impl Series {
    pub const ALL: [Series; 2] = [Series::Original, Series::Predicted];

    /// Position of the series in the chart's dataset list.
    pub fn index(self) -> usize {
        match self {
            Series::Original => 0,
            Series::Predicted => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Series::Original => "Original Data",
            Series::Predicted => "Predicted Data",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Series::Original => "original",
            Series::Predicted => "predicted",
        }
    }

    pub fn background_color(self) -> &'static str {
        match self {
            Series::Original => "rgba(75, 192, 192, 0.6)",
            Series::Predicted => "rgba(255, 99, 132, 0.6)",
        }
    }

    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Series::Original => (75, 192, 192),
            Series::Predicted => (255, 99, 132),
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub label: String,
    pub data: Vec<Point>,
    pub background_color: String,
}

impl Dataset {
    fn empty(series: Series) -> Self {
        Self {
            label: series.label().to_string(),
            data: Vec::new(),
            background_color: series.background_color().to_string(),
        }
    }
}

/// Anything that can show the two scatter series: the in-memory
/// [`ChartState`] or a browser chart.
pub trait ChartSurface {
    /// Replace (never append) the points of one series.
    fn replace_dataset(&mut self, series: Series, points: Vec<Point>);
    fn set_title(&mut self, title: String);
    /// Redraw after datasets or title changed.
    fn update(&mut self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartState {
    datasets: [Dataset; 2],
    x_title: String,
    y_title: String,
    title: Option<String>,
    revision: u64,
}

impl Default for ChartState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartState {
    /// Two empty series with the fixed axis titles.
    pub fn new() -> Self {
        Self {
            datasets: [
                Dataset::empty(Series::Original),
                Dataset::empty(Series::Predicted),
            ],
            x_title: X_AXIS_TITLE.to_string(),
            y_title: Y_AXIS_TITLE.to_string(),
            title: None,
            revision: 0,
        }
    }

    pub fn dataset(&self, series: Series) -> &Dataset {
        &self.datasets[series.index()]
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn points(&self, series: Series) -> &[Point] {
        &self.dataset(series).data
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn x_title(&self) -> &str {
        &self.x_title
    }

    pub fn y_title(&self) -> &str {
        &self.y_title
    }

    /// Number of redraws requested so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.iter().all(|d| d.data.is_empty())
    }

    /// Bounds over both series as `(x_min, x_max, y_min, y_max)`.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self.datasets.iter().flat_map(|d| d.data.iter());
        let first = points.next()?;
        Some(points.fold(
            (first.x, first.x, first.y, first.y),
            |(x0, x1, y0, y1), p| (x0.min(p.x), x1.max(p.x), y0.min(p.y), y1.max(p.y)),
        ))
    }

    /// Scatter chart configuration understood by Chart.js.
    pub fn chart_config(&self) -> JsonValue {
        let mut options = json!({
            "responsive": true,
            "scales": {
                "x": { "title": { "display": true, "text": self.x_title } },
                "y": { "title": { "display": true, "text": self.y_title } }
            }
        });
        if let Some(title) = self.title.as_deref() {
            options["plugins"] = json!({ "title": title_plugin(title) });
        }
        json!({
            "type": "scatter",
            "data": { "datasets": self.datasets },
            "options": options
        })
    }
}

/// Plugin-level title block shown above the chart.
pub fn title_plugin(title: &str) -> JsonValue {
    json!({ "display": true, "text": title })
}

impl ChartSurface for ChartState {
    fn replace_dataset(&mut self, series: Series, points: Vec<Point>) {
        self.datasets[series.index()].data = points;
    }

    fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    fn update(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chart_has_two_empty_series() {
        let chart = ChartState::new();
        assert!(chart.is_empty());
        assert_eq!(chart.datasets().len(), 2);
        assert_eq!(chart.dataset(Series::Original).label, "Original Data");
        assert_eq!(chart.dataset(Series::Predicted).label, "Predicted Data");
        assert_eq!((chart.x_title(), chart.y_title()), ("Spine", "Poundage"));
        assert_eq!(chart.title(), None);
        assert_eq!(chart.bounds(), None);
    }

    #[test]
    fn test_replace_dataset_does_not_accumulate() {
        let mut chart = ChartState::new();
        chart.replace_dataset(Series::Original, vec![Point { x: 1.0, y: 2.0 }]);
        chart.replace_dataset(
            Series::Original,
            vec![Point { x: 3.0, y: 4.0 }, Point { x: 5.0, y: 6.0 }],
        );
        assert_eq!(
            chart.points(Series::Original),
            &[Point { x: 3.0, y: 4.0 }, Point { x: 5.0, y: 6.0 }]
        );
        assert!(chart.points(Series::Predicted).is_empty());
        assert_eq!(chart.bounds(), Some((3.0, 5.0, 4.0, 6.0)));
    }

    #[test]
    fn test_chart_config_shape() {
        let mut chart = ChartState::new();
        let config = chart.chart_config();
        assert_eq!(config["type"], "scatter");
        assert_eq!(config["options"]["scales"]["x"]["title"]["text"], "Spine");
        assert_eq!(config["options"]["scales"]["y"]["title"]["text"], "Poundage");
        assert_eq!(
            config["data"]["datasets"][1]["backgroundColor"],
            "rgba(255, 99, 132, 0.6)"
        );
        assert!(config["options"].get("plugins").is_none());

        chart.replace_dataset(Series::Predicted, vec![Point { x: 400.0, y: 44.8 }]);
        chart.set_title("Arrow Length: 28\", Poundage Type: recurve".into());
        let config = chart.chart_config();
        assert_eq!(
            config["data"]["datasets"][1]["data"],
            json!([{ "x": 400.0, "y": 44.8 }])
        );
        assert_eq!(
            config["options"]["plugins"]["title"],
            json!({ "display": true, "text": "Arrow Length: 28\", Poundage Type: recurve" })
        );
    }

    #[test]
    fn test_update_bumps_revision() {
        let mut chart = ChartState::new();
        chart.update();
        chart.update();
        assert_eq!(chart.revision(), 2);
    }
}
