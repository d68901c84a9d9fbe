pub mod api_doc;
pub mod dependency;
pub mod error;
