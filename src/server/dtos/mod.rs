pub mod content_dto;
pub mod health_dto;

pub use content_dto::*;
