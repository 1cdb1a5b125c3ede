pub mod config_gen;
pub mod partners;
pub mod queue;

pub use config_gen::config_generate;
pub use partners::import_partners;
pub use queue::{cleanup_queue, process_queue};
