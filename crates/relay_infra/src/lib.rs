mod env;
mod http;
mod local_store;
mod stdio_transport;
mod token_cache;

pub use env::*;
pub use http::*;
pub use local_store::*;
pub use stdio_transport::*;
pub use token_cache::*;
