use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use gloo_net::http::Request;
use leptos::*;
use serde::Serialize;
use spine_chart::chart::title_plugin;
use spine_chart::{
    decode_response, to_csv_string, CalculateTransport, CalculationForm, CalculationHandler,
    CalculationRequest, CalculationResponse, ChartState, ChartSurface, ClientConfig, Outcome,
    Point, PoundageType, Series, SpineError, CALCULATE_PATH,
};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{console, Blob, HtmlCanvasElement};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");

const IDLE_STATUS: &str = "Enter an arrow length and click Calculate.";

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn get_path(root: &JsValue, path: &[&str]) -> Result<JsValue, JsValue> {
    let mut current = root.clone();
    for key in path {
        current = js_sys::Reflect::get(&current, &JsValue::from_str(key))?;
    }
    Ok(current)
}

/// Chart state mirrored into a Chart.js instance once the canvas is mounted.
#[derive(Default)]
struct PageChart {
    state: ChartState,
    handle: Option<JsValue>,
}

impl PageChart {
    fn attach(&mut self, canvas: &HtmlCanvasElement) -> Result<(), JsValue> {
        let ctx = canvas
            .get_context("2d")?
            .ok_or_else(|| JsValue::from_str("canvas has no 2d context"))?;
        let ctor = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Chart"))?
            .dyn_into::<js_sys::Function>()
            .map_err(|_| JsValue::from_str("Chart.js is not loaded"))?;
        let config = to_js(&self.state.chart_config())?;
        let args = js_sys::Array::of2(&ctx.into(), &config);
        self.handle = Some(js_sys::Reflect::construct(&ctor, &args)?);
        Ok(())
    }

    fn state(&self) -> &ChartState {
        &self.state
    }

    fn sync(&self, chart: &JsValue) -> Result<(), JsValue> {
        let datasets = get_path(chart, &["data", "datasets"])?;
        for series in Series::ALL {
            let dataset = js_sys::Reflect::get_u32(&datasets, series.index() as u32)?;
            let points: &[Point] = self.state.points(series);
            js_sys::Reflect::set(&dataset, &JsValue::from_str("data"), &to_js(points)?)?;
        }

        if let Some(title) = self.state.title() {
            let options = get_path(chart, &["options"])?;
            let mut plugins = js_sys::Reflect::get(&options, &JsValue::from_str("plugins"))?;
            if plugins.is_undefined() || plugins.is_null() {
                plugins = js_sys::Object::new().into();
                js_sys::Reflect::set(&options, &JsValue::from_str("plugins"), &plugins)?;
            }
            js_sys::Reflect::set(&plugins, &JsValue::from_str("title"), &to_js(&title_plugin(title))?)?;
        }

        let update = js_sys::Reflect::get(chart, &JsValue::from_str("update"))?
            .dyn_into::<js_sys::Function>()?;
        update.call0(chart)?;
        Ok(())
    }
}

impl ChartSurface for PageChart {
    fn replace_dataset(&mut self, series: Series, points: Vec<Point>) {
        self.state.replace_dataset(series, points);
    }

    fn set_title(&mut self, title: String) {
        self.state.set_title(title);
    }

    fn update(&mut self) {
        self.state.update();
        if let Some(chart) = self.handle.as_ref() {
            if let Err(err) = self.sync(chart) {
                console::error_2(&JsValue::from_str("Chart redraw failed:"), &err);
            }
        }
    }
}

struct GlooTransport {
    url: String,
}

impl GlooTransport {
    fn same_origin() -> Self {
        let url = ClientConfig::same_origin()
            .endpoint_url()
            .unwrap_or_else(|_| CALCULATE_PATH.to_string());
        Self { url }
    }
}

#[async_trait(?Send)]
impl CalculateTransport for GlooTransport {
    async fn calculate(
        &self,
        request: &CalculationRequest,
    ) -> Result<CalculationResponse, SpineError> {
        let response = Request::post(&self.url)
            .json(request)
            .map_err(|e| SpineError::Transport(e.to_string()))?
            .send()
            .await
            .map_err(|e| SpineError::Transport(e.to_string()))?;
        if !response.ok() {
            return Err(SpineError::Status {
                status: response.status(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| SpineError::Transport(e.to_string()))?;
        decode_response(&body)
    }
}

fn blob_url_from_str(s: &str) -> Option<String> {
    let arr = js_sys::Array::new();
    arr.push(&JsValue::from_str(s));
    let blob = Blob::new_with_str_sequence(&arr).ok()?;
    web_sys::Url::create_object_url_with_blob(&blob).ok()
}

#[component]
pub fn App() -> impl IntoView {
    let (busy, set_busy) = create_signal(false);
    let (status, set_status) = create_signal(String::from(IDLE_STATUS));
    let (regression, set_regression) = create_signal(String::new());
    let (csv_href, set_csv_href) = create_signal(String::new());

    let arrow_length_ref = create_node_ref::<html::Input>();
    let poundage_ref = create_node_ref::<html::Select>();
    let canvas_ref = create_node_ref::<html::Canvas>();

    let chart = Rc::new(RefCell::new(PageChart::default()));
    let handler = Rc::new(CalculationHandler::new(GlooTransport::same_origin()));

    canvas_ref.on_load({
        let chart = chart.clone();
        move |canvas| {
            if let Err(err) = chart.borrow_mut().attach(&canvas) {
                console::error_2(&JsValue::from_str("Chart setup failed:"), &err);
            }
        }
    });

    let on_calculate = move |_ev: leptos::ev::MouseEvent| {
        let (Some(input), Some(select)) =
            (arrow_length_ref.get_untracked(), poundage_ref.get_untracked())
        else {
            return;
        };
        let form = CalculationForm::new(input.value(), select.value());
        set_busy.set(true);
        set_status.set("Calculating…".to_string());

        let chart = chart.clone();
        let handler = handler.clone();
        spawn_local(async move {
            match handler.handle(&*chart, &form).await {
                Outcome::Updated(summary) => {
                    let line = format!("Linear Regression: {}", summary.regression);
                    console::log_1(&JsValue::from_str(&line));
                    set_regression.set(line);

                    match to_csv_string(chart.borrow().state()) {
                        Ok(csv) => {
                            let old = csv_href.get_untracked();
                            if !old.is_empty() {
                                let _ = web_sys::Url::revoke_object_url(&old);
                            }
                            set_csv_href.set(blob_url_from_str(&csv).unwrap_or_default());
                        }
                        Err(err) => console::error_1(&JsValue::from_str(&err.to_string())),
                    }
                    set_status.set(format!(
                        "{} original and {} predicted points.",
                        summary.original_points, summary.predicted_points
                    ));
                }
                // the running calculation owns the busy flag
                Outcome::Ignored => return,
                Outcome::Failed(err) => {
                    console::error_1(&JsValue::from_str(&format!(
                        "Error calculating data: {err}"
                    )));
                    set_status.set(IDLE_STATUS.to_string());
                }
            }
            set_busy.set(false);
        });
    };

    let poundage_options = move || {
        PoundageType::ALL
            .into_iter()
            .map(|kind| view! { <option value={kind.as_str()}>{kind.display_name()}</option> })
            .collect_view()
    };

    view! {
        <main class="tufte">
            <header>
                <h1>"Arrow Spine Calculator"</h1>
                <p class="subtitle">"Spine versus poundage, with the server's regression fit."</p>
                <p class="note">{"Web version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </header>
            <section class="controls">
                <div class="control-row">
                    <label>"Arrow length (in): "
                        <input id="arrowLength" type="number" step="0.25" value="28" node_ref=arrow_length_ref/>
                    </label>
                    <label>"Poundage type: "
                        <select id="poundageType" node_ref=poundage_ref>{poundage_options}</select>
                    </label>
                </div>
                <button id="calculate" class="btn" on:click=on_calculate disabled=move || busy.get()>"Calculate"</button>
                <span class="note">{move || status.get()}</span>
            </section>
            <section class="plots">
                <canvas id="spineChart" class="plot" node_ref=canvas_ref></canvas>
            </section>
            <section class="files">
                <p class="note">{move || regression.get()}</p>
            </section>
            <section class="downloads">
                <a
                    id="dl_points"
                    href=move || csv_href.get()
                    download="spine_chart.csv"
                    style:display=move || if csv_href.get().is_empty() { "none" } else { "inline" }
                >
                    "Download spine_chart.csv"
                </a>
            </section>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}
