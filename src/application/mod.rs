pub mod application;
pub mod background;
pub mod config;
pub mod logging;
