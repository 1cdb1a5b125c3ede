pub mod health;
pub mod postback;

pub use health::{HealthService, health_routes};
pub use postback::{PostbackResponse, PostbackService, PostbackState, postback_routes};
