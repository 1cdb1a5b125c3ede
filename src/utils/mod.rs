pub mod ip;
pub mod time;

pub use ip::extract_client_ip;
pub use time::{format_timestamp, now_seconds};
