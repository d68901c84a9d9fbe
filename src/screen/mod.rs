pub mod element;
pub mod forest;
pub mod tree;
