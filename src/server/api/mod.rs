pub mod health_controller;
pub mod page_controller;
pub mod proxy_controller;

pub use page_controller::PageController;
pub use proxy_controller::ProxyController;
