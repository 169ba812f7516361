pub mod brick;
pub mod config;
pub mod messages;
pub mod runtime;
