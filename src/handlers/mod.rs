mod api;
mod health;
mod hello;

pub use api::{ENDPOINTS, api_info};
pub use health::{health_check, method_not_allowed, not_found};
pub use hello::hello;
