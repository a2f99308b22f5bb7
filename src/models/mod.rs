mod api;

pub use api::{ApiInfo, ApiResponse, EndpointInfo, HealthResponse, HelloMessage};
