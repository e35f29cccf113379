use log::info;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use warp::reply::Response;
use warp::Filter;

use super::routes::*;

/// REST surface over the session and download managers.
pub struct WebServer {
    ctx: ApiContext,
}

impl WebServer {
    pub fn new(ctx: ApiContext) -> Self {
        Self { ctx }
    }

    /// Every route, with JSON rejections.
    pub fn routes(&self) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
        let ctx = self.ctx.clone();

        let sessions = launch_session_route(ctx.clone())
            .or(list_sessions_route(ctx.clone()))
            .unify()
            .or(get_session_route(ctx.clone()))
            .unify()
            .or(heartbeat_route(ctx.clone()))
            .unify()
            .or(session_control_route(ctx.clone()))
            .unify();

        let games = search_games_route(ctx.clone())
            .or(game_stats_route(ctx.clone()))
            .unify()
            .or(game_detail_route(ctx.clone()))
            .unify();

        let downloads = list_downloads_route(ctx.clone())
            .or(enqueue_download_route(ctx.clone()))
            .unify()
            .or(concurrency_route(ctx.clone()))
            .unify()
            .or(cancel_download_route(ctx.clone()))
            .unify()
            .or(download_control_route(ctx.clone()))
            .unify();

        sessions
            .or(games)
            .unify()
            .or(downloads)
            .unify()
            .or(events_route(ctx))
            .unify()
            .recover(handle_rejection)
            .unify()
    }

    /// Serves on `addr` until `shutdown` is cancelled.
    pub async fn run(&self, addr: SocketAddr, shutdown: CancellationToken) {
        let routes = self.routes();
        info!("REST API listening on http://{}", addr);
        tokio::select! {
            _ = warp::serve(routes).run(addr) => {}
            _ = shutdown.cancelled() => {
                info!("REST API stopped");
            }
        }
    }
}
