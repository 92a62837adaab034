pub mod backend_services;
pub mod filter_services;
pub mod gateway_services;
pub mod metadata_services;

pub use backend_services::{Backend, BackendRegistry};
pub use filter_services::DynFilterService;
pub use gateway_services::GatewayServices;
pub use metadata_services::DynMetadataService;
