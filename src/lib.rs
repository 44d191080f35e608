mod annotate;
mod detection_service;
mod error;
mod image_codec;
mod ort_service;
mod routes;
mod server;
mod state;

pub mod config;
pub mod detection;
pub mod labels;
pub mod model_service;

pub use detection_service::{DetectionResponse, DetectionService};
pub use error::{DetectHumanError, ErrorResponse};
pub use server::{start_server, HttpServer};
