mod args;
mod cache_entry;
mod cache_key;
mod error;
mod ids;
mod operation;
mod route;
mod rpc;
mod settings;
mod tool_definition;
mod tool_name;
mod tool_result;

pub use args::*;
pub use cache_entry::*;
pub use cache_key::*;
pub use error::*;
pub use ids::*;
pub use operation::*;
pub use route::*;
pub use rpc::*;
pub use settings::*;
pub use tool_definition::*;
pub use tool_name::*;
pub use tool_result::*;
