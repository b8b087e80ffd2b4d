use std::cell::RefCell;
use std::fs::{self, File};
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use plotters::coord::Shift;
use plotters::prelude::*;
use spine_chart::{
    decode_response, write_points_csv, CalculateTransport, CalculationForm, CalculationHandler,
    CalculationRequest, CalculationResponse, CalculationSummary, ChartState, ClientConfig,
    Outcome, PoundageType, RegressionLine, Series, SpineError, CALCULATE_PATH, DEFAULT_SERVER,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Arrow spine calculator client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request a spine/poundage regression from the server and chart it
    Calculate(CalculateArgs),
    /// Chart a previously saved /api/calculate response
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct FormArgs {
    /// Arrow length in inches, passed through as typed
    #[arg(long, allow_hyphen_values = true)]
    arrow_length: String,

    /// Bow type whose poundage column is charted
    #[arg(long, value_enum, default_value_t = PoundageOpt::Recurve)]
    poundage_type: PoundageOpt,
}

impl FormArgs {
    fn to_form(&self) -> CalculationForm {
        CalculationForm::new(
            self.arrow_length.clone(),
            PoundageType::from(self.poundage_type).as_str(),
        )
    }
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "spine_chart.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output PNG figure path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Overlay the fitted regression line on the plot
    #[arg(long, action = ArgAction::SetTrue)]
    regression_line: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct CalculateArgs {
    #[command(flatten)]
    form: FormArgs,

    /// Calculator server base URL
    #[arg(long, default_value = DEFAULT_SERVER)]
    server: String,

    /// Calculation endpoint path
    #[arg(long, default_value = CALCULATE_PATH)]
    endpoint: String,

    /// Request timeout in seconds (none by default)
    #[arg(long)]
    timeout: Option<f64>,

    /// Also write the raw response body to this path
    #[arg(long, value_hint = ValueHint::FilePath)]
    save_response: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Saved response JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    response: PathBuf,

    #[command(flatten)]
    form: FormArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PoundageOpt {
    Recurve,
    Compound,
    Longbow,
}

impl From<PoundageOpt> for PoundageType {
    fn from(value: PoundageOpt) -> Self {
        match value {
            PoundageOpt::Recurve => PoundageType::Recurve,
            PoundageOpt::Compound => PoundageType::Compound,
            PoundageOpt::Longbow => PoundageType::Longbow,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Calculate(args) => args.output.verbose,
        Command::Render(args) => args.output.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Calculate(args) => handle_calculate(args).await,
        Command::Render(args) => handle_render(args).await,
    }
}

async fn handle_calculate(args: CalculateArgs) -> Result<()> {
    let timeout = args.timeout.map(parse_timeout).transpose()?;
    let config = ClientConfig {
        base_url: args.server.clone(),
        endpoint: args.endpoint.clone(),
        timeout,
    };
    let transport = HttpTransport::new(&config, args.save_response.clone())?;
    info!("Requesting {}", transport.url);
    let (chart, summary) = run_calculation(transport, &args.form.to_form()).await?;
    write_outputs(&chart, &summary, &args.output)
}

fn parse_timeout(secs: f64) -> Result<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(anyhow!("--timeout must be a positive number, got {secs}"));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow!("--timeout {secs} is out of range: {e}"))
}

async fn handle_render(args: RenderArgs) -> Result<()> {
    let transport = FileTransport {
        path: args.response.clone(),
    };
    let (chart, summary) = run_calculation(transport, &args.form.to_form()).await?;
    write_outputs(&chart, &summary, &args.output)
}

async fn run_calculation<T: CalculateTransport>(
    transport: T,
    form: &CalculationForm,
) -> Result<(ChartState, CalculationSummary)> {
    let handler = CalculationHandler::new(transport);
    let chart = RefCell::new(ChartState::new());
    let summary = match handler.handle(&chart, form).await {
        Outcome::Updated(summary) => summary,
        Outcome::Failed(err) => return Err(anyhow::Error::new(err).context("calculation failed")),
        Outcome::Ignored => return Err(anyhow!("calculation was ignored while another was running")),
    };
    info!(
        "{}: {} original, {} predicted points",
        summary.title, summary.original_points, summary.predicted_points
    );
    Ok((chart.into_inner(), summary))
}

struct HttpTransport {
    client: reqwest::Client,
    url: String,
    save_response: Option<PathBuf>,
}

impl HttpTransport {
    fn new(config: &ClientConfig, save_response: Option<PathBuf>) -> Result<Self> {
        let url = config.endpoint_url()?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url,
            save_response,
        })
    }
}

#[async_trait(?Send)]
impl CalculateTransport for HttpTransport {
    async fn calculate(
        &self,
        request: &CalculationRequest,
    ) -> Result<CalculationResponse, SpineError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| SpineError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SpineError::Status {
                status: status.as_u16(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| SpineError::Transport(e.to_string()))?;
        debug!("received {} byte response", body.len());

        if let Some(path) = self.save_response.as_ref() {
            match fs::write(path, &body) {
                Ok(()) => info!("Saved response: {}", path.display()),
                Err(err) => warn!("Could not save response to {}: {}", path.display(), err),
            }
        }
        decode_response(&body)
    }
}

/// Replays a response saved by `calculate --save-response`.
struct FileTransport {
    path: PathBuf,
}

#[async_trait(?Send)]
impl CalculateTransport for FileTransport {
    async fn calculate(
        &self,
        _request: &CalculationRequest,
    ) -> Result<CalculationResponse, SpineError> {
        let body = fs::read_to_string(&self.path).map_err(|e| {
            SpineError::Transport(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        decode_response(&body)
    }
}

fn write_outputs(chart: &ChartState, summary: &CalculationSummary, args: &OutputArgs) -> Result<()> {
    if args.output.as_os_str() == "-" {
        write_points_csv(chart, io::stdout().lock())?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        write_points_csv(chart, file)?;
        info!("Wrote points CSV: {}", args.output.display());
    }

    if args.no_plot {
        return Ok(());
    }
    let regression = args.regression_line.then_some(summary.regression);

    if let Some(path) = default_png_path(args) {
        match render_chart_guard(chart, regression, &path, ChartKind::Png) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping PNG render ({}): {}", path.display(), err),
        }
    }
    if let Some(path) = args.svg.as_ref() {
        match render_chart_guard(chart, regression, path, ChartKind::Svg) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping SVG render ({}): {}", path.display(), err),
        }
    }
    Ok(())
}

/// Explicit `--png`, else next to the CSV; nothing when the CSV goes to stdout.
fn default_png_path(args: &OutputArgs) -> Option<PathBuf> {
    if let Some(path) = args.png.as_ref() {
        return Some(path.clone());
    }
    if args.output.as_os_str() == "-" {
        return None;
    }
    let mut png_path = args.output.clone();
    png_path.set_extension("png");
    Some(png_path)
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

fn render_chart_guard(
    chart: &ChartState,
    regression: Option<RegressionLine>,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_scatter(chart, regression, path, kind).map_err(|e| format!("plotting error: {e}"))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_scatter(
    chart: &ChartState,
    regression: Option<RegressionLine>,
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 760)).into_drawing_area();
            draw_scatter(root, chart, regression)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 760)).into_drawing_area();
            draw_scatter(root, chart, regression)
        }
    }
}

/// Axis ranges over both series with a 5% margin; unit ranges for an empty chart.
fn padded_bounds(chart: &ChartState) -> (f64, f64, f64, f64) {
    let Some((x0, x1, y0, y1)) = chart.bounds() else {
        return (0.0, 1.0, 0.0, 1.0);
    };
    let pad = |lo: f64, hi: f64| {
        let span = hi - lo;
        if span.abs() < f64::EPSILON {
            (lo - 1.0, hi + 1.0)
        } else {
            (lo - span * 0.05, hi + span * 0.05)
        }
    };
    let (x0, x1) = pad(x0, x1);
    let (y0, y1) = pad(y0, y1);
    (x0, x1, y0, y1)
}

fn draw_scatter<DB>(
    root: DrawingArea<DB, Shift>,
    chart: &ChartState,
    regression: Option<RegressionLine>,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let (x0, x1, y0, y1) = padded_bounds(chart);

    let mut builder = ChartBuilder::on(&root);
    builder
        .margin(25)
        .x_label_area_size(50)
        .y_label_area_size(60);
    if let Some(title) = chart.title() {
        builder.caption(title, ("sans-serif", 26));
    }
    let mut plot = builder.build_cartesian_2d(x0..x1, y0..y1)?;

    plot.configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_desc(chart.x_title())
        .y_desc(chart.y_title())
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .draw()?;

    for series in Series::ALL {
        let (r, g, b) = series.rgb();
        let color = RGBColor(r, g, b).mix(0.6);
        plot.draw_series(
            chart
                .points(series)
                .iter()
                .map(|p| Circle::new((p.x, p.y), 5, color.filled())),
        )?
        .label(series.label())
        .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }

    if let Some(line) = regression {
        let style = ShapeStyle {
            color: BLACK.mix(0.7),
            filled: false,
            stroke_width: 2,
        };
        plot.draw_series(LineSeries::new(
            [(x0, line.evaluate(x0)), (x1, line.evaluate(x1))],
            style,
        ))?
        .label(format!("Regression {line}"))
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], style));
    }

    plot.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(())
}
