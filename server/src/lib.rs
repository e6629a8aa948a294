// HTTP front end for the dietec query engine
pub mod http_server;

pub use http_server::{router, run_server, AppState};
