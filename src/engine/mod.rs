pub mod context;
pub mod device;
pub mod error;
pub mod selector;
pub mod verifier;
