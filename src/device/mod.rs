pub mod bridge;
pub mod http;
