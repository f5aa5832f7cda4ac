pub mod http;
pub mod traits;
pub mod types;
