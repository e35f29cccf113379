use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;
use warp::reply::Response;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::*;
use crate::download_management::DownloadManager;
use crate::error_handling::types::{DownloadError, ScraperError, SessionError};
use crate::events::EventSink;
use crate::scraper::{ScraperKind, ScraperRegistry};
use crate::session_management::{ResourceSnapshot, SessionManager};

/// Largest JSON body accepted by the API.
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Services the routes operate on.
#[derive(Clone)]
pub struct ApiContext {
    pub sessions: SessionManager,
    pub downloads: DownloadManager,
    pub events: Arc<EventSink>,
    pub scrapers: Arc<ScraperRegistry>,
}

fn with_context(ctx: ApiContext) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub(crate) fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(body), status).into_response()
}

pub(crate) fn error_reply(message: impl Into<String>, status: StatusCode) -> Response {
    json_reply(
        &ApiError {
            message: message.into(),
        },
        status,
    )
}

fn session_error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Conflict(_) | SessionError::InvalidState { .. } => StatusCode::CONFLICT,
        SessionError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Launch(_) | SessionError::Timeout(_) | SessionError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn download_error_status(err: &DownloadError) -> StatusCode {
    match err {
        DownloadError::NotFound(_) => StatusCode::NOT_FOUND,
        DownloadError::Conflict(_) | DownloadError::InvalidState { .. } => StatusCode::CONFLICT,
        DownloadError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DownloadError::RuntimeUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scraper_error_status(err: &ScraperError) -> StatusCode {
    match err {
        ScraperError::NotFound(_) => StatusCode::NOT_FOUND,
        ScraperError::UnknownScraper(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ScraperError::RequestFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn session_error(err: SessionError) -> Response {
    error_reply(err.to_string(), session_error_status(&err))
}

fn download_error(err: DownloadError) -> Response {
    error_reply(err.to_string(), download_error_status(&err))
}

fn scraper_error(err: ScraperError) -> Response {
    error_reply(err.to_string(), scraper_error_status(&err))
}

fn parse_session_id(id_str: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id_str)
        .map_err(|_| error_reply("Invalid session id", StatusCode::BAD_REQUEST))
}

/// POST /sessions
pub fn launch_session_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("sessions")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<LaunchBody>())
        .and(with_context(ctx))
        .and_then(|body: LaunchBody, ctx: ApiContext| async move {
            let res = match ctx.sessions.launch(&body.game_id, body.request).await {
                Ok(session_id) => {
                    json_reply(&LaunchResponse { session_id }, StatusCode::ACCEPTED)
                }
                Err(e) => session_error(e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// GET /sessions[?game_id=]
pub fn list_sessions_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("sessions")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<SessionQuery>())
        .and(with_context(ctx))
        .and_then(|query: SessionQuery, ctx: ApiContext| async move {
            let list = match query.game_id {
                Some(game_id) => ctx.sessions.get_sessions(&game_id).await,
                None => ctx.sessions.list_sessions().await,
            };
            Ok::<_, Rejection>(json_reply(&list, StatusCode::OK))
        })
}

/// GET /sessions/:id
pub fn get_session_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("sessions" / String)
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|id_str: String, ctx: ApiContext| async move {
            let id = match parse_session_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            let res = match ctx.sessions.get_session(id).await {
                Ok(session) => json_reply(&session, StatusCode::OK),
                Err(e) => session_error(e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// POST /sessions/:id/{stop,pause,resume}
pub fn session_control_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("sessions" / String / String)
        .and(warp::post())
        .and(with_context(ctx))
        .and_then(|id_str: String, action: String, ctx: ApiContext| async move {
            let id = match parse_session_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            let result = match action.as_str() {
                "stop" => ctx.sessions.stop(id).await,
                "pause" => ctx.sessions.pause(id).await,
                "resume" => ctx.sessions.resume(id).await,
                _ => return Err(warp::reject::not_found()),
            };
            let res = match result.and(ctx.sessions.get_session(id).await) {
                Ok(session) => json_reply(&session, StatusCode::ACCEPTED),
                Err(e) => session_error(e),
            };
            Ok(res)
        })
}

/// POST /sessions/:id/heartbeat
pub fn heartbeat_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("sessions" / String / "heartbeat")
        .and(warp::post())
        .and(json_body::<ResourceSnapshot>())
        .and(with_context(ctx))
        .and_then(
            |id_str: String, snapshot: ResourceSnapshot, ctx: ApiContext| async move {
                let id = match parse_session_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let res = match ctx.sessions.heartbeat(id, snapshot).await {
                    Ok(()) => reply::with_status(reply::reply(), StatusCode::NO_CONTENT).into_response(),
                    Err(e) => session_error(e),
                };
                Ok::<_, Rejection>(res)
            },
        )
}

/// GET /games?q=&scraper=
pub fn search_games_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("games")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<GameSearchQuery>())
        .and(with_context(ctx))
        .and_then(|query: GameSearchQuery, ctx: ApiContext| async move {
            let kind = match query.scraper.as_deref().map(str::parse::<ScraperKind>) {
                None => ScraperKind::Library,
                Some(Ok(kind)) => kind,
                Some(Err(e)) => return Ok::<_, Rejection>(scraper_error(e)),
            };
            let scraper = match ctx.scrapers.get(kind) {
                Ok(scraper) => scraper,
                Err(e) => return Ok(scraper_error(e)),
            };
            let res = match scraper.search(&query.q).await {
                Ok(hits) => json_reply(&hits, StatusCode::OK),
                Err(e) => scraper_error(e),
            };
            Ok(res)
        })
}

/// GET /games/:id
pub fn game_detail_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("games" / String)
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|game_id: String, ctx: ApiContext| async move {
            let res = match ctx.scrapers.get(ScraperKind::Library) {
                Ok(scraper) => match scraper.get_game_detail(&game_id).await {
                    Ok(detail) => json_reply(&detail, StatusCode::OK),
                    Err(e) => scraper_error(e),
                },
                Err(e) => scraper_error(e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// GET /games/:id/stats
pub fn game_stats_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("games" / String / "stats")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|game_id: String, ctx: ApiContext| async move {
            let sessions = ctx.sessions.get_stats(&game_id).await;
            let aggregates = ctx.events.game_stats(&game_id);
            Ok::<_, Rejection>(json_reply(
                &GameStatsResponse::new(sessions, &aggregates),
                StatusCode::OK,
            ))
        })
}

/// GET /downloads
pub fn list_downloads_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("downloads")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(|ctx: ApiContext| async move {
            Ok::<_, Rejection>(json_reply(&ctx.downloads.get_all_downloads(), StatusCode::OK))
        })
}

/// POST /downloads
pub fn enqueue_download_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("downloads")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<EnqueueBody>())
        .and(with_context(ctx))
        .and_then(|body: EnqueueBody, ctx: ApiContext| async move {
            let res = match ctx
                .downloads
                .enqueue(&body.game_id, &body.url, body.target_path)
            {
                Ok(download) => json_reply(&download, StatusCode::ACCEPTED),
                Err(e) => download_error(e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// DELETE /downloads/:game_id
pub fn cancel_download_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("downloads" / String)
        .and(warp::delete())
        .and(with_context(ctx))
        .and_then(|game_id: String, ctx: ApiContext| async move {
            let res = match ctx
                .downloads
                .cancel_download(&game_id)
                .and_then(|()| ctx.downloads.get_download(&game_id))
            {
                Ok(download) => json_reply(&download, StatusCode::ACCEPTED),
                Err(e) => download_error(e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// POST /downloads/:game_id/{pause,resume}
pub fn download_control_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("downloads" / String / String)
        .and(warp::post())
        .and(with_context(ctx))
        .and_then(|game_id: String, action: String, ctx: ApiContext| async move {
            let result = match action.as_str() {
                "pause" => ctx.downloads.pause_download(&game_id),
                "resume" => ctx.downloads.resume_download(&game_id),
                _ => return Err(warp::reject::not_found()),
            };
            let res = match result.and_then(|()| ctx.downloads.get_download(&game_id)) {
                Ok(download) => json_reply(&download, StatusCode::ACCEPTED),
                Err(e) => download_error(e),
            };
            Ok(res)
        })
}

/// PUT /downloads/concurrency
pub fn concurrency_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("downloads" / "concurrency")
        .and(warp::put())
        .and(json_body::<ConcurrencyBody>())
        .and(with_context(ctx))
        .and_then(|body: ConcurrencyBody, ctx: ApiContext| async move {
            let res = match ctx.downloads.set_max_concurrent_downloads(body.max_concurrent) {
                Ok(()) => json_reply(
                    &ConcurrencyResponse {
                        max_concurrent: ctx.downloads.max_concurrent_downloads(),
                        active: ctx.downloads.active_transfers(),
                    },
                    StatusCode::OK,
                ),
                Err(e) => download_error(e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// GET /events?since=
pub fn events_route(
    ctx: ApiContext,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and(with_context(ctx))
        .and_then(|query: EventsQuery, ctx: ApiContext| async move {
            Ok::<_, Rejection>(json_reply(
                &ctx.events.events_since(query.since),
                StatusCode::OK,
            ))
        })
}

/// Turns unmatched routes and malformed bodies into JSON errors.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let res = if err.is_not_found() {
        error_reply("Not found", StatusCode::NOT_FOUND)
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        error_reply(format!("Malformed body: {}", e), StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply("Body too large", StatusCode::PAYLOAD_TOO_LARGE)
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        error_reply("Invalid query string", StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    } else {
        error_reply("Internal error", StatusCode::INTERNAL_SERVER_ERROR)
    };
    Ok(res)
}
