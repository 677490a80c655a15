pub mod actions;
pub mod config;
pub mod errors;
pub mod generation;
pub mod models;
pub mod providers;
pub mod render;
pub mod sanitizer;
