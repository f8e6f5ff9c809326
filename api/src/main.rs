//! An api for the step-count leaderboard.

#[macro_use]
extern crate rocket;

mod helpers;

use helpers::{
    ApiError, ApiErrorBody, ApiResult, CorsFairing, RequestTimingFairing, bad_request_error,
    core_error, internal_error, not_found_error, read_text_body,
};
use rocket::data::{Data, Limits};
use rocket::fairing::{self, AdHoc};
use rocket::http::Header;
use rocket::serde::Serialize;
use rocket::serde::json::{self, Json, Value, json};
use rocket::tokio::task::spawn_blocking;
use rocket::{Build, Rocket, State};
use rocket_prometheus::PrometheusMetrics;
use std::sync::Arc;
use stepboard_common::{Leaderboard, MergeReport, ScalarKey, ScalarSnapshot, StoreConfig};
use tracing_subscriber::EnvFilter;

/// Figment key holding the `StoreConfig` table.
const CONFIG_KEY: &str = "stepboard";

type Board = Arc<Leaderboard>;

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
struct WriteResponse {
    message: &'static str,
    #[serde(flatten)]
    report: MergeReport,
}

#[derive(Responder)]
#[response(content_type = "text/csv; charset=utf-8")]
struct CsvDownload {
    body: String,
    disposition: Header<'static>,
}

/// Run a leaderboard operation off the async workers; it does file IO and may wait on a lock.
async fn with_board<T, F>(board: &State<Board>, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Leaderboard) -> stepboard_common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let board = Arc::clone(board.inner());
    spawn_blocking(move || op(&board))
        .await
        .map_err(|e| internal_error(format!("Worker task failed: {e}")))?
        .map_err(core_error)
}

#[post("/csv", data = "<data>")]
async fn upload_csv(
    data: Data<'_>,
    limits: &Limits,
    board: &State<Board>,
) -> ApiResult<WriteResponse> {
    let text = read_text_body(data, limits).await?;
    let report = with_board(board, move |b| b.upload_submission(&text)).await?;
    Ok(Json(WriteResponse {
        message: "File uploaded successfully",
        report,
    }))
}

#[post("/manual", data = "<data>")]
async fn manual(data: Data<'_>, limits: &Limits, board: &State<Board>) -> ApiResult<WriteResponse> {
    let text = read_text_body(data, limits).await?;
    let report = with_board(board, move |b| b.append_manual_csv(&text)).await?;
    Ok(Json(WriteResponse {
        message: "CSV received and processed",
        report,
    }))
}

#[get("/leaderboard")]
async fn leaderboard(board: &State<Board>) -> Result<CsvDownload, ApiError> {
    match with_board(board, Leaderboard::table_csv).await? {
        Some(body) => Ok(CsvDownload {
            body,
            disposition: Header::new(
                "Content-Disposition",
                "attachment; filename=\"leaderboard.csv\"",
            ),
        }),
        None => Err(not_found_error("No leaderboard has been merged yet.")),
    }
}

#[get("/progress")]
async fn progress(board: &State<Board>) -> ApiResult<ScalarSnapshot> {
    let snapshot = with_board(board, |b| Ok(b.scalars().snapshot())).await?;
    Ok(Json(snapshot))
}

#[get("/current_steps")]
async fn current_steps(board: &State<Board>) -> ApiResult<Value> {
    let total = with_board(board, |b| Ok(b.total_steps())).await?;
    Ok(Json(json!({ "current_steps": total })))
}

async fn read_scalar(board: &State<Board>, key: ScalarKey) -> ApiResult<Value> {
    let value = with_board(board, move |b| Ok(b.scalars().get(key))).await?;
    let mut body = json!({});
    body[key.field_name()] = json!(value);
    Ok(Json(body))
}

/// Pull the single numeric value for `key` out of a set request.
fn scalar_from_body(key: ScalarKey, body: Result<Json<Value>, json::Error<'_>>) -> Result<f64, ApiError> {
    let Json(body) = body.map_err(|e| bad_request_error(format!("Invalid JSON body: {e}")))?;
    body.get(key.field_name())
        .and_then(Value::as_f64)
        .ok_or_else(|| bad_request_error(format!("Invalid {key} value.")))
}

async fn write_scalar(
    board: &State<Board>,
    key: ScalarKey,
    body: Result<Json<Value>, json::Error<'_>>,
) -> ApiResult<Value> {
    let value = scalar_from_body(key, body)?;
    with_board(board, move |b| b.scalars().set(key, value)).await?;
    let mut response = json!({ "message": format!("Updated {key}.") });
    response[key.field_name()] = json!(value);
    Ok(Json(response))
}

#[get("/step_goal")]
async fn get_step_goal(board: &State<Board>) -> ApiResult<Value> {
    read_scalar(board, ScalarKey::StepGoal).await
}

#[post("/step_goal", data = "<body>")]
async fn set_step_goal(
    body: Result<Json<Value>, json::Error<'_>>,
    board: &State<Board>,
) -> ApiResult<Value> {
    write_scalar(board, ScalarKey::StepGoal, body).await
}

#[get("/goal")]
async fn get_goal(board: &State<Board>) -> ApiResult<Value> {
    read_scalar(board, ScalarKey::Goal).await
}

#[post("/goal", data = "<body>")]
async fn set_goal(body: Result<Json<Value>, json::Error<'_>>, board: &State<Board>) -> ApiResult<Value> {
    write_scalar(board, ScalarKey::Goal, body).await
}

#[get("/current_value")]
async fn get_current_value(board: &State<Board>) -> ApiResult<Value> {
    read_scalar(board, ScalarKey::CurrentValue).await
}

#[post("/current_value", data = "<body>")]
async fn set_current_value(
    body: Result<Json<Value>, json::Error<'_>>,
    board: &State<Board>,
) -> ApiResult<Value> {
    write_scalar(board, ScalarKey::CurrentValue, body).await
}

/// CORS preflight; the headers come from `CorsFairing`.
#[options("/<_..>")]
fn preflight() {}

#[catch(404)]
fn not_found() -> Json<ApiErrorBody> {
    not_found_error("The requested resource could not be found.").1
}

#[catch(500)]
fn internal() -> Json<ApiErrorBody> {
    internal_error("The server encountered an internal error.").1
}

/// Open the stores once Rocket's configuration is known. Fails ignition on bad config.
async fn open_leaderboard(rocket: Rocket<Build>) -> fairing::Result {
    let figment = rocket.figment();
    let config = if figment.contains(CONFIG_KEY) {
        match figment.extract_inner::<StoreConfig>(CONFIG_KEY) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Invalid {CONFIG_KEY} configuration");
                return Err(rocket);
            }
        }
    } else {
        StoreConfig::default()
    };

    match Leaderboard::open(&config) {
        Ok(board) => {
            tracing::info!(
                data_dir = %config.data_dir.display(),
                lock_timeout_ms = config.lock_timeout_ms,
                "Leaderboard store opened"
            );
            Ok(rocket.manage(Arc::new(board)))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to open leaderboard store");
            Err(rocket)
        }
    }
}

fn mount(rocket: Rocket<Build>) -> Rocket<Build> {
    let prometheus = PrometheusMetrics::new();
    rocket
        .attach(RequestTimingFairing)
        .attach(CorsFairing)
        .attach(prometheus.clone())
        .attach(AdHoc::try_on_ignite("Leaderboard store", open_leaderboard))
        .mount(
            "/",
            routes![
                upload_csv,
                manual,
                leaderboard,
                progress,
                current_steps,
                get_step_goal,
                set_step_goal,
                get_goal,
                set_goal,
                get_current_value,
                set_current_value,
                preflight,
            ],
        )
        .mount("/metrics", prometheus)
        .register("/", catchers![not_found, internal])
}

#[launch]
fn rocket() -> _ {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
    mount(rocket::build())
}
