mod curriculum;
mod ids;
mod learner;
mod progress;

pub use ids::{ActivityId, LessonId, LevelId, ParseIdError, UnitId, UserId};

pub use curriculum::{Activity, Lesson, Level, Unit};
pub use learner::{AccessTier, LearnerState};
pub use progress::{ActivityOrder, LessonProgress, SENTINEL_DONE, Score};
