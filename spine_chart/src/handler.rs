use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::chart::{ChartSurface, Series};
use crate::{
    parse_arrow_length, CalculationRequest, CalculationResponse, PoundageType, RegressionLine,
    SpineError,
};

/// Sends one calculation request to the server.
///
/// Futures are not `Send` so browser transports can implement this directly.
#[async_trait(?Send)]
pub trait CalculateTransport {
    async fn calculate(
        &self,
        request: &CalculationRequest,
    ) -> Result<CalculationResponse, SpineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightPolicy {
    /// Overlapping invocations all run; the last response to resolve wins.
    Concurrent,
    /// Invocations arriving while one is outstanding are ignored.
    SingleFlight,
}

impl Default for FlightPolicy {
    fn default() -> Self {
        FlightPolicy::SingleFlight
    }
}

/// Raw form values, exactly as read from the inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CalculationForm {
    pub arrow_length: String,
    pub poundage_type: String,
}

impl CalculationForm {
    pub fn new(arrow_length: impl Into<String>, poundage_type: impl Into<String>) -> Self {
        Self {
            arrow_length: arrow_length.into(),
            poundage_type: poundage_type.into(),
        }
    }

    pub fn to_request(&self) -> Result<CalculationRequest, SpineError> {
        Ok(CalculationRequest {
            arrow_length: parse_arrow_length(&self.arrow_length),
            poundage_type: self.poundage_type.parse()?,
        })
    }

    /// Chart title; the arrow length is shown as typed, not as parsed.
    pub fn title(&self) -> String {
        format!(
            "Arrow Length: {}\", Poundage Type: {}",
            self.arrow_length, self.poundage_type
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalculationSummary {
    pub title: String,
    pub poundage_type: PoundageType,
    pub regression: RegressionLine,
    pub original_points: usize,
    pub predicted_points: usize,
}

#[derive(Debug)]
pub enum Outcome {
    Updated(CalculationSummary),
    /// Another calculation was still in flight.
    Ignored,
    Failed(SpineError),
}

impl Outcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Outcome::Updated(_))
    }

    pub fn summary(&self) -> Option<&CalculationSummary> {
        match self {
            Outcome::Updated(summary) => Some(summary),
            _ => None,
        }
    }
}

pub struct CalculationHandler<T> {
    transport: T,
    policy: FlightPolicy,
    in_flight: Cell<usize>,
}

impl<T: CalculateTransport> CalculationHandler<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: FlightPolicy::default(),
            in_flight: Cell::new(0),
        }
    }

    pub fn with_policy(mut self, policy: FlightPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FlightPolicy {
        self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.get() > 0
    }

    /// Run one calculation and apply it to `chart`.
    ///
    /// Failures are logged and leave the chart untouched. The chart is only
    /// borrowed after the response has been fully mapped, never across an
    /// await point.
    pub async fn handle<C: ChartSurface>(
        &self,
        chart: &RefCell<C>,
        form: &CalculationForm,
    ) -> Outcome {
        let _flight = match self.enter() {
            Some(flight) => flight,
            None => {
                debug!("calculation already in flight, ignoring request");
                return Outcome::Ignored;
            }
        };

        match self.run(chart, form).await {
            Ok(summary) => {
                info!("Linear Regression: {}", summary.regression);
                Outcome::Updated(summary)
            }
            Err(err) => {
                error!("Error calculating data: {err}");
                Outcome::Failed(err)
            }
        }
    }

    async fn run<C: ChartSurface>(
        &self,
        chart: &RefCell<C>,
        form: &CalculationForm,
    ) -> Result<CalculationSummary, SpineError> {
        let request = form.to_request()?;
        debug!(
            arrow_length = request.arrow_length,
            poundage_type = %request.poundage_type,
            "sending calculation request"
        );
        let response = self.transport.calculate(&request).await?;
        let (original, predicted) = response.points(request.poundage_type)?;

        let summary = CalculationSummary {
            title: form.title(),
            poundage_type: request.poundage_type,
            regression: response.regression(),
            original_points: original.len(),
            predicted_points: predicted.len(),
        };

        let mut chart = chart.borrow_mut();
        chart.replace_dataset(Series::Original, original);
        chart.replace_dataset(Series::Predicted, predicted);
        chart.set_title(summary.title.clone());
        chart.update();
        Ok(summary)
    }

    fn enter(&self) -> Option<FlightGuard<'_>> {
        let active = self.in_flight.get();
        if self.policy == FlightPolicy::SingleFlight && active > 0 {
            return None;
        }
        self.in_flight.set(active + 1);
        Some(FlightGuard {
            counter: &self.in_flight,
        })
    }
}

struct FlightGuard<'a> {
    counter: &'a Cell<usize>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.set(self.counter.get().saturating_sub(1));
    }
}
