#![forbid(unsafe_code)]

pub mod access;
pub mod error;
pub mod hearts;
pub mod model;
pub mod rules;
pub mod streak;
pub mod time;
pub mod unlock;

pub use error::{Error, ValidationError};
pub use rules::ProgressionRules;
pub use time::{Clock, ManualClock};
