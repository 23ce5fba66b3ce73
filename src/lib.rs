pub mod backend;
pub mod cli;
pub mod config;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod outcome;
pub mod rewrite;
pub mod server;
pub mod session;
pub mod signals;
pub mod timer;
