mod fast_path;
mod infra;
mod local_backend;
mod remote_backend;
mod response_cache;
mod router;
#[cfg(test)]
mod test_support;

pub use fast_path::*;
pub use infra::*;
pub use local_backend::*;
pub use remote_backend::*;
pub use response_cache::*;
pub use router::*;
