pub mod api;

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use self::api::AppState;

pub struct Server {
    addr: SocketAddr,
    state: AppState,
    static_dir: Option<PathBuf>,
}

impl Server {
    pub fn new(addr: SocketAddr, state: AppState, static_dir: Option<PathBuf>) -> Self {
        Self {
            addr,
            state,
            static_dir,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let app = api::router(self.state, self.static_dir);
        api::start_http_server(self.addr, app).await
    }
}
