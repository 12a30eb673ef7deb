//! Content model - courses, chapters, lessons and students.
//!
//! These records are owned by the content-authoring and account subsystems.
//! The progress engine only reads them.

use serde::{Deserialize, Serialize};
use crate::id::{ChapterId, CourseId, LessonId, StudentId};
use crate::Time;

/// A course is an ordered set of chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Unique identifier
    pub id: CourseId,

    /// Course title
    pub title: String,

    /// Number of chapters a student must finish
    pub chapter_count: u32,

    /// Whether completing the course issues a certificate
    pub has_certificate: bool,

    /// Language the course was authored in
    pub base_language: String,
}

/// A chapter groups lessons inside a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Unique identifier
    pub id: ChapterId,

    /// Owning course
    pub course_id: CourseId,

    /// Chapter title
    pub title: String,

    /// Number of lessons a student must complete
    pub lesson_count: u32,

    /// Accessible without an enrollment
    pub is_freemium: bool,
}

/// The kind of lesson, which decides the completion preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    /// Rich text content
    Content,
    /// Video player
    Video,
    /// Slide deck
    Presentation,
    /// Embedded external resource
    Embed,
    /// Scored quiz, must be passed
    Quiz,
    /// Conversation judged by an AI mentor
    AiMentor,
}

impl LessonType {
    /// Lesson types that track an explicit "started" flag. Other types are
    /// considered viewed as soon as they are opened.
    pub fn tracks_start(&self) -> bool {
        matches!(self, LessonType::Content | LessonType::Quiz | LessonType::AiMentor)
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonType::Content => "content",
            LessonType::Video => "video",
            LessonType::Presentation => "presentation",
            LessonType::Embed => "embed",
            LessonType::Quiz => "quiz",
            LessonType::AiMentor => "ai_mentor",
        }
    }
}

impl std::str::FromStr for LessonType {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content" => Ok(LessonType::Content),
            "video" => Ok(LessonType::Video),
            "presentation" => Ok(LessonType::Presentation),
            "embed" => Ok(LessonType::Embed),
            "quiz" => Ok(LessonType::Quiz),
            "ai_mentor" => Ok(LessonType::AiMentor),
            other => Err(crate::ParseEnumError::new("LessonType", other)),
        }
    }
}

/// A single unit of learning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Unique identifier
    pub id: LessonId,

    /// Owning chapter
    pub chapter_id: ChapterId,

    /// Lesson title
    pub title: String,

    /// Lesson kind
    pub lesson_type: LessonType,

    /// Language the lesson was authored in
    pub base_language: String,

    /// Languages the lesson has been translated to
    #[serde(default)]
    pub available_locales: Vec<String>,

    /// Maximum quiz attempts (quiz lessons only, None = unlimited)
    #[serde(default)]
    pub attempts_limit: Option<u32>,

    /// Hours a student must wait between quiz attempts
    #[serde(default)]
    pub quiz_cooldown_hours: Option<u32>,
}

/// A learner account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Unique identifier
    pub id: StudentId,

    /// Display name
    pub name: String,

    /// Soft-delete marker
    #[serde(default)]
    pub deleted_at: Option<Time>,
}

impl Student {
    /// Whether the account is still usable.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Role of the caller interacting with a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Learner
    Student,
    /// Platform administrator
    Admin,
    /// Course author
    ContentCreator,
}

impl Role {
    /// Roles whose interaction with a lesson is not learning and is never tracked.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::ContentCreator)
    }
}

impl std::str::FromStr for Role {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            "content_creator" => Ok(Role::ContentCreator),
            other => Err(crate::ParseEnumError::new("Role", other)),
        }
    }
}
