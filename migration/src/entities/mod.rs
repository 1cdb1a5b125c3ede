pub mod detailed_stats;
pub mod partner;
pub mod postback_queue;
pub mod setting;
pub mod summary_stats;

pub use detailed_stats::Entity as DetailedStatsEntity;
pub use partner::Entity as PartnerEntity;
pub use postback_queue::Entity as PostbackQueueEntity;
pub use setting::Entity as SettingEntity;
pub use summary_stats::Entity as SummaryStatsEntity;
