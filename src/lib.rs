//! Symbolic UI automation for Android apps.
//!
//! Scripts name UI elements by document symbols (`$send_button`) instead of
//! coordinates. At run time each symbol is resolved against the live
//! accessibility tree: directly, by scrolling containers, or by replaying the
//! navigation steps recorded in the API document.

pub mod cli;
pub mod device;
pub mod doc;
pub mod engine;
pub mod logging;
pub mod markup;
pub mod report;
pub mod runner;
pub mod screen;
pub mod script;
pub mod trace;
