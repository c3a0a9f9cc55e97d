use crate::api::routes;
use crate::config::SharedConfig;
use crate::server::udp::SharedSrpServer;
use crate::time::Clock;
use std::future::Future;
use std::net::SocketAddr;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: SharedConfig,
    pub server: SharedSrpServer,
    pub clock: Clock,
}

pub fn new(
    config: SharedConfig,
    server: SharedSrpServer,
    clock: Clock,
    bind_addr: SocketAddr,
) -> impl Future<Output = hyper::Result<()>> {
    axum::Server::bind(&bind_addr).serve(
        routes::new(AppState {
            config,
            server,
            clock,
        })
        .into_make_service(),
    )
}
