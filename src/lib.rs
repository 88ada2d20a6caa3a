pub mod app;
pub mod config;
pub mod flows;
pub mod host;
pub mod remote;
pub mod shared;
pub mod tui;
pub mod wizard;
