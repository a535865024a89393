//! API middleware

mod cors;
mod logging;
mod rate_limit;

pub use cors::cors_layer;
pub use logging::RequestLogging;
pub use rate_limit::RateLimiter;
