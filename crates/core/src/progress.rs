//! Progress rows owned by the progress engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{CertificateId, ChapterId, CourseId, LessonId, ProgressId, StudentId};
use crate::Time;

/// Metadata key holding the language a course was finished in.
pub const COMPLETED_LANGUAGE_KEY: &str = "completed_language";

/// A student's progress on one lesson.
///
/// Keyed by `(student_id, lesson_id, chapter_id)`. Once `completed_at` is set
/// the completion path never clears it; only a quiz retake may.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    /// Row identifier (side tables hang off it)
    pub id: ProgressId,

    /// Student
    pub student_id: StudentId,

    /// Lesson
    pub lesson_id: LessonId,

    /// Chapter the lesson belongs to
    pub chapter_id: ChapterId,

    /// Whether the student explicitly opened the lesson
    pub is_started: bool,

    /// When the lesson was started
    pub started_at: Option<Time>,

    /// When the lesson was completed
    pub completed_at: Option<Time>,

    /// Quiz attempts used (never decreases)
    pub attempts: u32,

    /// Last quiz score
    pub quiz_score: Option<u32>,

    /// Whether the last quiz attempt passed
    pub is_quiz_passed: Option<bool>,

    /// Number of quiz questions answered
    pub completed_question_count: u32,

    /// Language the student answered in
    pub language_answered: Option<String>,

    /// Last time the row changed
    pub updated_at: Time,
}

impl LessonProgress {
    /// Create an empty row for a student and lesson.
    pub fn new(student_id: StudentId, lesson_id: LessonId, chapter_id: ChapterId) -> Self {
        Self {
            id: ProgressId::new(),
            student_id,
            lesson_id,
            chapter_id,
            is_started: false,
            started_at: None,
            completed_at: None,
            attempts: 0,
            quiz_score: None,
            is_quiz_passed: None,
            completed_question_count: 0,
            language_answered: None,
            updated_at: chrono::Utc::now(),
        }
    }

    /// Whether the lesson is completed.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Verdict recorded by the AI mentor for a lesson attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMentorJudgement {
    /// Whether the student met the lesson goal
    pub passed: bool,

    /// Short explanation from the mentor
    pub summary: String,

    /// Optional score (0-100)
    #[serde(default)]
    pub score: Option<u32>,
}

/// Judgement stored in the side table keyed by the progress row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMentorRecord {
    /// Progress row this judgement belongs to
    pub progress_id: ProgressId,

    /// Latest judgement
    pub judgement: AiMentorJudgement,

    /// When the judgement was first recorded
    pub created_at: Time,

    /// When the judgement last changed
    pub updated_at: Time,
}

/// A student's aggregate progress on one chapter.
///
/// `completed_lesson_count` is always recomputed from lesson rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterProgress {
    /// Student
    pub student_id: StudentId,

    /// Chapter
    pub chapter_id: ChapterId,

    /// Course the chapter belongs to
    pub course_id: CourseId,

    /// Completed lessons at the last recompute
    pub completed_lesson_count: u32,

    /// When every lesson of the chapter was completed
    pub completed_at: Option<Time>,

    /// Whether the chapter was finished without an enrollment
    pub completed_as_freemium: bool,

    /// Last recompute
    pub updated_at: Time,
}

/// Enrollment status of a student in a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    /// Paid or granted access, counts towards completion
    Enrolled,
    /// Access revoked (refund, removal)
    Revoked,
    /// Access expired
    Expired,
}

impl EnrollmentStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Revoked => "revoked",
            EnrollmentStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrolled" => Ok(EnrollmentStatus::Enrolled),
            "revoked" => Ok(EnrollmentStatus::Revoked),
            "expired" => Ok(EnrollmentStatus::Expired),
            other => Err(crate::ParseEnumError::new("EnrollmentStatus", other)),
        }
    }
}

/// Course-level progress of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseProgress {
    /// No chapter finished and no lesson credited yet
    NotStarted,
    /// At least one lesson credited
    InProgress,
    /// Every chapter finished
    Completed,
}

impl CourseProgress {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseProgress::NotStarted => "not_started",
            CourseProgress::InProgress => "in_progress",
            CourseProgress::Completed => "completed",
        }
    }
}

impl std::str::FromStr for CourseProgress {
    type Err = crate::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(CourseProgress::NotStarted),
            "in_progress" => Ok(CourseProgress::InProgress),
            "completed" => Ok(CourseProgress::Completed),
            other => Err(crate::ParseEnumError::new("CourseProgress", other)),
        }
    }
}

/// A student's enrollment in a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentCourseEnrollment {
    /// Student
    pub student_id: StudentId,

    /// Course
    pub course_id: CourseId,

    /// Access status
    pub status: EnrollmentStatus,

    /// Course progress
    pub progress: CourseProgress,

    /// Chapters finished at the last evaluation
    pub finished_chapter_count: u32,

    /// When the course was completed
    pub completed_at: Option<Time>,

    /// Extra completion facts, e.g. the language the course was finished in
    #[serde(default)]
    pub completion_metadata: BTreeMap<String, String>,
}

impl StudentCourseEnrollment {
    /// A fresh enrollment that has not been worked on yet.
    pub fn enrolled(student_id: StudentId, course_id: CourseId) -> Self {
        Self {
            student_id,
            course_id,
            status: EnrollmentStatus::Enrolled,
            progress: CourseProgress::NotStarted,
            finished_chapter_count: 0,
            completed_at: None,
            completion_metadata: BTreeMap::new(),
        }
    }
}

/// Certificate of course completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Unique identifier
    pub id: CertificateId,

    /// Student
    pub student_id: StudentId,

    /// Course
    pub course_id: CourseId,

    /// When the certificate was issued
    pub issued_at: Time,
}

/// Per-course statistic counters maintained on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStat {
    /// Completions of courses that started as freemium and issue a certificate
    CompletedAsFreemium,
    /// Completions of purchased courses without a certificate
    PaidPurchased,
}

impl CourseStat {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStat::CompletedAsFreemium => "completed_as_freemium",
            CourseStat::PaidPurchased => "paid_purchased",
        }
    }
}
