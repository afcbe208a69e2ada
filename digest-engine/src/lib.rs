pub mod types;
pub mod utils;
pub mod ranking;
pub mod preference;
pub mod trigger;
pub mod scheduler;
pub mod settings;
pub mod sources;
pub mod delivery;
pub mod pipeline;
pub mod service;

pub use types::*;
pub use ranking::{RankedArticle, RankingEngine};
pub use preference::PreferenceModel;
pub use trigger::{DailyTrigger, TimeOfDay, TriggerId, TriggerTable};
pub use scheduler::{DigestScheduler, SchedulerPhase};
pub use settings::{SettingsManager, DEFAULT_SETTINGS};
pub use sources::HackerNewsFeed;
pub use delivery::LogSink;
pub use pipeline::DigestPipeline;
pub use service::DigestService;
