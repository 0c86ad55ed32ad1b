pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod formula;
pub mod orchestrator;
pub mod ui;
pub mod util;
