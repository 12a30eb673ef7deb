//! Unique identifiers for lessonflow entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier.
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a Student
    StudentId
);
ulid_id!(
    /// Unique identifier for a Course
    CourseId
);
ulid_id!(
    /// Unique identifier for a Chapter
    ChapterId
);
ulid_id!(
    /// Unique identifier for a Lesson
    LessonId
);
ulid_id!(
    /// Unique identifier for a lesson progress row
    ProgressId
);
ulid_id!(
    /// Unique identifier for a Certificate
    CertificateId
);
ulid_id!(
    /// Unique identifier for an Event
    EventId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trips_through_display() {
        let id = LessonId::new();
        let parsed: LessonId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_rejects_garbage() {
        assert!("not-a-ulid".parse::<CourseId>().is_err());
    }
}
