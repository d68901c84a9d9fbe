pub mod parse;
pub mod serialize;
pub mod skeleton;
pub mod xpath;
