pub mod config;
pub mod error;
pub mod generator;
pub mod image_api;
pub mod image_processing;
pub mod page_geometry;
pub mod printer;
pub mod service;
pub mod voice;
pub mod web;

pub use config::Config;
pub use error::AppError;
pub use web::{AppState, router};
