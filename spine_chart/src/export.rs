use std::io::Write;

use crate::chart::{ChartState, Series};
use crate::SpineError;

/// Write both series as `series,spine,poundage` rows.
pub fn write_points_csv<W: Write>(chart: &ChartState, writer: W) -> Result<(), SpineError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer
        .write_record(["series", "spine", "poundage"])
        .map_err(|e| SpineError::Export(e.to_string()))?;
    for series in Series::ALL {
        for point in chart.points(series) {
            writer
                .write_record([
                    series.key().to_string(),
                    point.x.to_string(),
                    point.y.to_string(),
                ])
                .map_err(|e| SpineError::Export(e.to_string()))?;
        }
    }
    writer
        .flush()
        .map_err(|e| SpineError::Export(e.to_string()))?;
    Ok(())
}

pub fn to_csv_string(chart: &ChartState) -> Result<String, SpineError> {
    let mut buf = Vec::new();
    write_points_csv(chart, &mut buf)?;
    String::from_utf8(buf).map_err(|e| SpineError::Export(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartSurface, Point};

    #[test]
    fn test_csv_lists_original_then_predicted() {
        let mut chart = ChartState::new();
        chart.replace_dataset(
            Series::Original,
            vec![Point { x: 400.0, y: 45.0 }, Point { x: 500.0, y: 38.5 }],
        );
        chart.replace_dataset(Series::Predicted, vec![Point { x: 400.0, y: 44.8 }]);

        let text = to_csv_string(&chart).unwrap();
        assert_eq!(
            text,
            "series,spine,poundage\n\
             original,400,45\n\
             original,500,38.5\n\
             predicted,400,44.8\n"
        );
    }

    #[test]
    fn test_csv_of_empty_chart_is_header_only() {
        let text = to_csv_string(&ChartState::new()).unwrap();
        assert_eq!(text, "series,spine,poundage\n");
    }
}
