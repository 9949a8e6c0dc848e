#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod progression_service;
pub mod ranking_service;
pub mod views;

pub use progress_core::Clock;

pub use app_services::AppServices;
pub use error::{AppServicesError, ProgressionError, RankingError};
pub use progression_service::ProgressionService;
pub use ranking_service::{DEFAULT_RANKING_LIMIT, RankingService};
pub use views::{
    CheckpointAck, CompletionResult, LessonResume, LessonView, MistakeOutcome, NextTarget,
    RankingEntry, StatusView, TrailLevel, UnitGridItem, UnitView, UserPosition,
};
