//! Arrow spine calculator client: request/response model, chart state and the
//! calculation handler shared by the CLI and the browser front-end.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod chart;
pub mod export;
pub mod handler;

pub use chart::{ChartState, ChartSurface, Dataset, Point, Series};
pub use export::{to_csv_string, write_points_csv};
pub use handler::{
    CalculateTransport, CalculationForm, CalculationHandler, CalculationSummary, FlightPolicy,
    Outcome,
};

pub const DEFAULT_SERVER: &str = "http://localhost:5001";
pub const CALCULATE_PATH: &str = "/api/calculate";

#[derive(Error, Debug)]
pub enum SpineError {
    #[error("unknown poundage type: '{0}'")]
    UnknownPoundageType(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned HTTP {status}")]
    Status { status: u16 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("{series} record {index} has no numeric '{field}' field")]
    MissingPoundage {
        series: Series,
        index: usize,
        field: &'static str,
    },
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to export CSV: {0}")]
    Export(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PoundageType {
    Recurve,
    Compound,
    Longbow,
}

impl PoundageType {
    pub const ALL: [PoundageType; 3] = [
        PoundageType::Recurve,
        PoundageType::Compound,
        PoundageType::Longbow,
    ];

    /// Value submitted by the selector and sent as `poundageType`.
    pub fn as_str(self) -> &'static str {
        match self {
            PoundageType::Recurve => "recurve",
            PoundageType::Compound => "compound",
            PoundageType::Longbow => "longbow",
        }
    }

    /// Record column holding the poundage for this bow type.
    pub fn field_name(self) -> &'static str {
        match self {
            PoundageType::Recurve => "recurvePoundage",
            PoundageType::Compound => "compoundPoundage",
            PoundageType::Longbow => "longbowPoundage",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PoundageType::Recurve => "Recurve",
            PoundageType::Compound => "Compound",
            PoundageType::Longbow => "Longbow",
        }
    }
}

impl fmt::Display for PoundageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoundageType {
    type Err = SpineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoundageType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SpineError::UnknownPoundageType(s.to_string()))
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CalculationRequest {
    /// Non-finite values serialize as JSON `null`.
    #[serde(rename = "arrowLength")]
    pub arrow_length: f64,
    #[serde(rename = "poundageType")]
    pub poundage_type: PoundageType,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpineRecord {
    #[serde(rename = "Spine")]
    pub spine: f64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, JsonValue>,
}

impl SpineRecord {
    pub fn poundage(&self, kind: PoundageType) -> Option<f64> {
        self.fields.get(kind.field_name()).and_then(JsonValue::as_f64)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalculationResponse {
    pub original_data: Vec<SpineRecord>,
    pub predicted_data: Vec<SpineRecord>,
    pub coef: f64,
    pub intercept: f64,
}

impl CalculationResponse {
    pub fn regression(&self) -> RegressionLine {
        RegressionLine {
            coef: self.coef,
            intercept: self.intercept,
        }
    }

    /// Map both record sequences onto `{x: Spine, y: poundage}` points, in order.
    pub fn points(&self, kind: PoundageType) -> Result<(Vec<Point>, Vec<Point>), SpineError> {
        let original = map_records(&self.original_data, kind, Series::Original)?;
        let predicted = map_records(&self.predicted_data, kind, Series::Predicted)?;
        Ok((original, predicted))
    }
}

fn map_records(
    records: &[SpineRecord],
    kind: PoundageType,
    series: Series,
) -> Result<Vec<Point>, SpineError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let y = record.poundage(kind).ok_or(SpineError::MissingPoundage {
                series,
                index,
                field: kind.field_name(),
            })?;
            Ok(Point { x: record.spine, y })
        })
        .collect()
}

/// Decode a `/api/calculate` response body.
pub fn decode_response(body: &str) -> Result<CalculationResponse, SpineError> {
    serde_json::from_str(body).map_err(|e| SpineError::MalformedResponse(e.to_string()))
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegressionLine {
    pub coef: f64,
    pub intercept: f64,
}

impl RegressionLine {
    pub fn evaluate(&self, x: f64) -> f64 {
        self.coef * x + self.intercept
    }
}

impl fmt::Display for RegressionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "y = {:.4}x + {:.4}", self.coef, self.intercept)
    }
}

/// Parse the arrow length the way a browser `parseFloat` does: the longest
/// numeric prefix after leading whitespace, `NaN` when there is none.
pub fn parse_arrow_length(input: &str) -> f64 {
    let s = input.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut saw_digits = end > int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if saw_digits || frac_end > frac_start {
            saw_digits = true;
            end = frac_end;
        }
    }
    if !saw_digits {
        return f64::NAN;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().unwrap_or(f64::NAN)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Scheme and host of the calculator server; empty for a same-origin page.
    pub base_url: String,
    pub endpoint: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER.to_string(),
            endpoint: CALCULATE_PATH.to_string(),
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn same_origin() -> Self {
        Self {
            base_url: String::new(),
            ..Self::default()
        }
    }

    pub fn endpoint_url(&self) -> Result<String, SpineError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(SpineError::InvalidEndpoint("empty endpoint path".into()));
        }
        let path = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{endpoint}")
        };

        let base = self.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Ok(path);
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(SpineError::InvalidEndpoint(format!(
                "server '{base}' must start with http:// or https://"
            )));
        }
        Ok(format!("{base}{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(spine: f64, field: &str, value: f64) -> SpineRecord {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), JsonValue::from(value));
        SpineRecord { spine, fields }
    }

    #[test]
    fn test_poundage_type_round_trip_names() {
        for kind in PoundageType::ALL {
            assert_eq!(kind.as_str().parse::<PoundageType>().unwrap(), kind);
            assert_eq!(kind.field_name(), format!("{}Poundage", kind.as_str()));
        }
        assert!(matches!(
            "Recurve".parse::<PoundageType>(),
            Err(SpineError::UnknownPoundageType(s)) if s == "Recurve"
        ));
    }

    #[test]
    fn test_request_serializes_wire_names() {
        let request = CalculationRequest {
            arrow_length: 28.5,
            poundage_type: PoundageType::Compound,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "arrowLength": 28.5, "poundageType": "compound" })
        );
    }

    #[test]
    fn test_nan_arrow_length_serializes_as_null() {
        let request = CalculationRequest {
            arrow_length: f64::NAN,
            poundage_type: PoundageType::Recurve,
        };
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(text, r#"{"arrowLength":null,"poundageType":"recurve"}"#);
    }

    #[test]
    fn test_decode_and_map_response() {
        let body = r#"{
            "original_data": [{"Spine": 400, "recurvePoundage": 45, "compoundPoundage": 60}],
            "predicted_data": [{"Spine": 400, "recurvePoundage": 44.8}],
            "coef": 0.11,
            "intercept": 2.3
        }"#;
        let response = decode_response(body).unwrap();
        let (original, predicted) = response.points(PoundageType::Recurve).unwrap();
        assert_eq!(original, vec![Point { x: 400.0, y: 45.0 }]);
        assert_eq!(predicted, vec![Point { x: 400.0, y: 44.8 }]);
        assert_eq!(response.regression().to_string(), "y = 0.1100x + 2.3000");
    }

    #[test]
    fn test_missing_poundage_field_is_an_error() {
        let response = CalculationResponse {
            original_data: vec![record(400.0, "recurvePoundage", 45.0)],
            predicted_data: vec![
                record(400.0, "recurvePoundage", 44.8),
                record(500.0, "compoundPoundage", 50.0),
            ],
            coef: 0.0,
            intercept: 0.0,
        };
        match response.points(PoundageType::Recurve) {
            Err(SpineError::MissingPoundage {
                series,
                index,
                field,
            }) => {
                assert_eq!(series, Series::Predicted);
                assert_eq!(index, 1);
                assert_eq!(field, "recurvePoundage");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        assert!(matches!(
            decode_response("<html>oops</html>"),
            Err(SpineError::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_response(r#"{"original_data": [], "coef": 1, "intercept": 0}"#),
            Err(SpineError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_arrow_length_matches_parse_float() {
        assert_eq!(parse_arrow_length("28"), 28.0);
        assert_eq!(parse_arrow_length("  28.75in"), 28.75);
        assert_eq!(parse_arrow_length("\u{feff}28"), 28.0);
        assert_eq!(parse_arrow_length("\u{a0}\t30"), 30.0);
        assert_eq!(parse_arrow_length("-3e2x"), -300.0);
        assert_eq!(parse_arrow_length(".5"), 0.5);
        assert_eq!(parse_arrow_length("29."), 29.0);
        assert_eq!(parse_arrow_length("1e"), 1.0);
        assert_eq!(parse_arrow_length("Infinity"), f64::INFINITY);
        assert!(parse_arrow_length("").is_nan());
        assert!(parse_arrow_length("abc").is_nan());
        assert!(parse_arrow_length("-.").is_nan());
    }

    #[test]
    fn test_endpoint_url() {
        let config = ClientConfig::default();
        assert_eq!(
            config.endpoint_url().unwrap(),
            "http://localhost:5001/api/calculate"
        );

        let config = ClientConfig {
            base_url: "https://spine.example.org/".into(),
            endpoint: "api/calculate".into(),
            timeout: None,
        };
        assert_eq!(
            config.endpoint_url().unwrap(),
            "https://spine.example.org/api/calculate"
        );

        assert_eq!(
            ClientConfig::same_origin().endpoint_url().unwrap(),
            "/api/calculate"
        );

        let bad = ClientConfig {
            base_url: "localhost:5001".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            bad.endpoint_url(),
            Err(SpineError::InvalidEndpoint(_))
        ));
    }
}
