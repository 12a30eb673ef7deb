//! SQLite storage backend for lessonflow.
//!
//! Every conditional write is a single guarded `UPDATE`, so concurrent
//! duplicates collapse onto one winner at the database level. This is the
//! recommended storage backend for production use.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use lessonflow_core::{
    AiMentorRecord, Certificate, Chapter, ChapterId, ChapterProgress, Course, CourseId,
    CourseProgress, CourseStat, EnrollmentStatus, Event, EventId, Lesson, LessonId,
    LessonProgress, ProgressId, Student, StudentCourseEnrollment, StudentId, Time,
    COMPLETED_LANGUAGE_KEY,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::trait_::{Result, Storage, StorageError, Transaction};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS courses (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        chapter_count INTEGER NOT NULL,
        has_certificate INTEGER NOT NULL,
        base_language TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chapters (
        id TEXT PRIMARY KEY,
        course_id TEXT NOT NULL,
        title TEXT NOT NULL,
        lesson_count INTEGER NOT NULL,
        is_freemium INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS lessons (
        id TEXT PRIMARY KEY,
        chapter_id TEXT NOT NULL,
        title TEXT NOT NULL,
        lesson_type TEXT NOT NULL,
        base_language TEXT NOT NULL,
        available_locales TEXT NOT NULL,
        attempts_limit INTEGER,
        quiz_cooldown_hours INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS students (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        deleted_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS enrollments (
        student_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        status TEXT NOT NULL,
        progress TEXT NOT NULL,
        finished_chapter_count INTEGER NOT NULL,
        completed_at TEXT,
        completion_metadata TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (student_id, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS lesson_progress (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        lesson_id TEXT NOT NULL,
        chapter_id TEXT NOT NULL,
        is_started INTEGER NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        attempts INTEGER NOT NULL,
        quiz_score INTEGER,
        is_quiz_passed INTEGER,
        completed_question_count INTEGER NOT NULL,
        language_answered TEXT,
        updated_at TEXT NOT NULL,
        UNIQUE (student_id, lesson_id, chapter_id)
    )",
    "CREATE TABLE IF NOT EXISTS ai_mentor_judgements (
        progress_id TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chapter_progress (
        student_id TEXT NOT NULL,
        chapter_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        completed_lesson_count INTEGER NOT NULL,
        completed_at TEXT,
        completed_as_freemium INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (student_id, chapter_id)
    )",
    "CREATE TABLE IF NOT EXISTS certificates (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        issued_at TEXT NOT NULL,
        UNIQUE (student_id, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS course_stats (
        course_id TEXT NOT NULL,
        stat TEXT NOT NULL,
        value INTEGER NOT NULL,
        PRIMARY KEY (course_id, stat)
    )",
    "CREATE TABLE IF NOT EXISTS outbox (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        dispatched_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_lesson_progress_chapter ON lesson_progress(student_id, chapter_id)",
    "CREATE INDEX IF NOT EXISTS idx_chapter_progress_course ON chapter_progress(student_id, course_id)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(dispatched_at, seq)",
];

/// How long a transaction waits for another writer before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite storage implementation.
///
/// Transactions start with `BEGIN IMMEDIATE`, so writers queue on the
/// database lock up front instead of failing when they upgrade from a read.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) a database file.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// The pool is capped at one connection because every `:memory:`
    /// connection is a separate database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT data FROM outbox WHERE dispatched_at IS NULL ORDER BY seq LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Event> {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    async fn mark_events_dispatched(&self, ids: &[EventId]) -> Result<()> {
        let now = chrono::Utc::now();
        for id in ids {
            sqlx::query(
                "UPDATE outbox SET dispatched_at = ? WHERE id = ? AND dispatched_at IS NULL",
            )
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn prune_dispatched_events(&self, before: Time) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM outbox WHERE dispatched_at IS NOT NULL AND dispatched_at < ?",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        debug!(pruned = result.rows_affected(), "Pruned outbox");
        Ok(result.rows_affected() as usize)
    }
}

/// Transaction over [`SqliteStorage`].
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

fn parse<T>(value: String) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        StorageError::Other(format!("invalid stored value '{}': {}", value, e))
    })
}

fn lesson_progress_from_row(row: &SqliteRow) -> Result<LessonProgress> {
    Ok(LessonProgress {
        id: parse(row.try_get("id")?)?,
        student_id: parse(row.try_get("student_id")?)?,
        lesson_id: parse(row.try_get("lesson_id")?)?,
        chapter_id: parse(row.try_get("chapter_id")?)?,
        is_started: row.try_get("is_started")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        quiz_score: row.try_get::<Option<i64>, _>("quiz_score")?.map(|v| v as u32),
        is_quiz_passed: row.try_get("is_quiz_passed")?,
        completed_question_count: row.try_get::<i64, _>("completed_question_count")? as u32,
        language_answered: row.try_get("language_answered")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn chapter_progress_from_row(row: &SqliteRow) -> Result<ChapterProgress> {
    Ok(ChapterProgress {
        student_id: parse(row.try_get("student_id")?)?,
        chapter_id: parse(row.try_get("chapter_id")?)?,
        course_id: parse(row.try_get("course_id")?)?,
        completed_lesson_count: row.try_get::<i64, _>("completed_lesson_count")? as u32,
        completed_at: row.try_get("completed_at")?,
        completed_as_freemium: row.try_get("completed_as_freemium")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_unique_violation(err: sqlx::Error, what: String) -> StorageError {
    let unique = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique {
        StorageError::Conflict(what)
    } else {
        StorageError::Sqlx(err)
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn load_course(&mut self, id: CourseId) -> Result<Option<Course>> {
        let row = sqlx::query(
            "SELECT id, title, chapter_count, has_certificate, base_language FROM courses WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<Course> {
            Ok(Course {
                id: parse(row.try_get("id")?)?,
                title: row.try_get("title")?,
                chapter_count: row.try_get::<i64, _>("chapter_count")? as u32,
                has_certificate: row.try_get("has_certificate")?,
                base_language: row.try_get("base_language")?,
            })
        })
        .transpose()
    }

    async fn load_chapter(&mut self, id: ChapterId) -> Result<Option<Chapter>> {
        let row = sqlx::query(
            "SELECT id, course_id, title, lesson_count, is_freemium FROM chapters WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<Chapter> {
            Ok(Chapter {
                id: parse(row.try_get("id")?)?,
                course_id: parse(row.try_get("course_id")?)?,
                title: row.try_get("title")?,
                lesson_count: row.try_get::<i64, _>("lesson_count")? as u32,
                is_freemium: row.try_get("is_freemium")?,
            })
        })
        .transpose()
    }

    async fn load_lesson(&mut self, id: LessonId) -> Result<Option<Lesson>> {
        let row = sqlx::query(
            "SELECT id, chapter_id, title, lesson_type, base_language, available_locales,
                    attempts_limit, quiz_cooldown_hours
             FROM lessons WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<Lesson> {
            let locales: String = row.try_get("available_locales")?;
            Ok(Lesson {
                id: parse(row.try_get("id")?)?,
                chapter_id: parse(row.try_get("chapter_id")?)?,
                title: row.try_get("title")?,
                lesson_type: parse(row.try_get("lesson_type")?)?,
                base_language: row.try_get("base_language")?,
                available_locales: serde_json::from_str(&locales)?,
                attempts_limit: row
                    .try_get::<Option<i64>, _>("attempts_limit")?
                    .map(|v| v as u32),
                quiz_cooldown_hours: row
                    .try_get::<Option<i64>, _>("quiz_cooldown_hours")?
                    .map(|v| v as u32),
            })
        })
        .transpose()
    }

    async fn load_student(&mut self, id: StudentId) -> Result<Option<Student>> {
        let row = sqlx::query("SELECT id, name, deleted_at FROM students WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(|row| -> Result<Student> {
            Ok(Student {
                id: parse(row.try_get("id")?)?,
                name: row.try_get("name")?,
                deleted_at: row.try_get("deleted_at")?,
            })
        })
        .transpose()
    }

    async fn save_course(&mut self, course: &Course) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO courses (id, title, chapter_count, has_certificate, base_language)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(course.id.to_string())
        .bind(&course.title)
        .bind(i64::from(course.chapter_count))
        .bind(course.has_certificate)
        .bind(&course.base_language)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_chapter(&mut self, chapter: &Chapter) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO chapters (id, course_id, title, lesson_count, is_freemium)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chapter.id.to_string())
        .bind(chapter.course_id.to_string())
        .bind(&chapter.title)
        .bind(i64::from(chapter.lesson_count))
        .bind(chapter.is_freemium)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_lesson(&mut self, lesson: &Lesson) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO lessons (id, chapter_id, title, lesson_type, base_language,
                available_locales, attempts_limit, quiz_cooldown_hours)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(lesson.id.to_string())
        .bind(lesson.chapter_id.to_string())
        .bind(&lesson.title)
        .bind(lesson.lesson_type.as_str())
        .bind(&lesson.base_language)
        .bind(serde_json::to_string(&lesson.available_locales)?)
        .bind(lesson.attempts_limit.map(i64::from))
        .bind(lesson.quiz_cooldown_hours.map(i64::from))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn save_student(&mut self, student: &Student) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO students (id, name, deleted_at) VALUES (?, ?, ?)")
            .bind(student.id.to_string())
            .bind(&student.name)
            .bind(student.deleted_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn load_enrollment(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<StudentCourseEnrollment>> {
        let row = sqlx::query(
            "SELECT student_id, course_id, status, progress, finished_chapter_count,
                    completed_at, completion_metadata
             FROM enrollments WHERE student_id = ? AND course_id = ?",
        )
        .bind(student_id.to_string())
        .bind(course_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<StudentCourseEnrollment> {
            let metadata: String = row.try_get("completion_metadata")?;
            Ok(StudentCourseEnrollment {
                student_id: parse(row.try_get("student_id")?)?,
                course_id: parse(row.try_get("course_id")?)?,
                status: parse(row.try_get("status")?)?,
                progress: parse(row.try_get("progress")?)?,
                finished_chapter_count: row.try_get::<i64, _>("finished_chapter_count")? as u32,
                completed_at: row.try_get("completed_at")?,
                completion_metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata)?,
            })
        })
        .transpose()
    }

    async fn save_enrollment(&mut self, enrollment: &StudentCourseEnrollment) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO enrollments (student_id, course_id, status, progress,
                finished_chapter_count, completed_at, completion_metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(enrollment.student_id.to_string())
        .bind(enrollment.course_id.to_string())
        .bind(enrollment.status.as_str())
        .bind(enrollment.progress.as_str())
        .bind(i64::from(enrollment.finished_chapter_count))
        .bind(enrollment.completed_at)
        .bind(serde_json::to_string(&enrollment.completion_metadata)?)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn complete_enrollment(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
        finished_chapter_count: u32,
        completed_at: Time,
        language: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE enrollments
             SET progress = ?, completed_at = ?, finished_chapter_count = ?,
                 completion_metadata = json_set(completion_metadata, ?, ?)
             WHERE student_id = ? AND course_id = ? AND status = ? AND progress <> ?",
        )
        .bind(CourseProgress::Completed.as_str())
        .bind(completed_at)
        .bind(i64::from(finished_chapter_count))
        .bind(format!("$.{}", COMPLETED_LANGUAGE_KEY))
        .bind(language)
        .bind(student_id.to_string())
        .bind(course_id.to_string())
        .bind(EnrollmentStatus::Enrolled.as_str())
        .bind(CourseProgress::Completed.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_enrollment_in_progress(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
        finished_chapter_count: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE enrollments SET progress = ?, finished_chapter_count = ?
             WHERE student_id = ? AND course_id = ? AND status = ? AND progress <> ?",
        )
        .bind(CourseProgress::InProgress.as_str())
        .bind(i64::from(finished_chapter_count))
        .bind(student_id.to_string())
        .bind(course_id.to_string())
        .bind(EnrollmentStatus::Enrolled.as_str())
        .bind(CourseProgress::Completed.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_lesson_progress(
        &mut self,
        student_id: StudentId,
        lesson_id: LessonId,
        chapter_id: ChapterId,
    ) -> Result<Option<LessonProgress>> {
        let row = sqlx::query(
            "SELECT * FROM lesson_progress WHERE student_id = ? AND lesson_id = ? AND chapter_id = ?",
        )
        .bind(student_id.to_string())
        .bind(lesson_id.to_string())
        .bind(chapter_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(lesson_progress_from_row).transpose()
    }

    async fn insert_lesson_progress(&mut self, progress: &LessonProgress) -> Result<()> {
        sqlx::query(
            "INSERT INTO lesson_progress (id, student_id, lesson_id, chapter_id, is_started,
                started_at, completed_at, attempts, quiz_score, is_quiz_passed,
                completed_question_count, language_answered, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(progress.id.to_string())
        .bind(progress.student_id.to_string())
        .bind(progress.lesson_id.to_string())
        .bind(progress.chapter_id.to_string())
        .bind(progress.is_started)
        .bind(progress.started_at)
        .bind(progress.completed_at)
        .bind(i64::from(progress.attempts))
        .bind(progress.quiz_score.map(i64::from))
        .bind(progress.is_quiz_passed)
        .bind(i64::from(progress.completed_question_count))
        .bind(&progress.language_answered)
        .bind(progress.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                format!(
                    "lesson progress for student {} lesson {}",
                    progress.student_id, progress.lesson_id
                ),
            )
        })?;
        Ok(())
    }

    async fn update_lesson_progress(&mut self, progress: &LessonProgress) -> Result<()> {
        let result = sqlx::query(
            "UPDATE lesson_progress SET is_started = ?, started_at = ?, completed_at = ?,
                attempts = ?, quiz_score = ?, is_quiz_passed = ?, completed_question_count = ?,
                language_answered = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(progress.is_started)
        .bind(progress.started_at)
        .bind(progress.completed_at)
        .bind(i64::from(progress.attempts))
        .bind(progress.quiz_score.map(i64::from))
        .bind(progress.is_quiz_passed)
        .bind(i64::from(progress.completed_question_count))
        .bind(&progress.language_answered)
        .bind(progress.updated_at)
        .bind(progress.id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("lesson progress {}", progress.id)));
        }
        Ok(())
    }

    async fn mark_lesson_completed(&mut self, id: ProgressId, completed_at: Time) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE lesson_progress SET completed_at = ?, updated_at = ?
             WHERE id = ? AND completed_at IS NULL",
        )
        .bind(completed_at)
        .bind(completed_at)
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_completed_lessons(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM lesson_progress
             WHERE student_id = ? AND chapter_id = ? AND completed_at IS NOT NULL",
        )
        .bind(student_id.to_string())
        .bind(chapter_id.to_string())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count as u32)
    }

    async fn list_lesson_progress(&mut self, student_id: StudentId) -> Result<Vec<LessonProgress>> {
        let rows = sqlx::query("SELECT * FROM lesson_progress WHERE student_id = ? ORDER BY id")
            .bind(student_id.to_string())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(lesson_progress_from_row).collect()
    }

    async fn load_ai_mentor_record(
        &mut self,
        progress_id: ProgressId,
    ) -> Result<Option<AiMentorRecord>> {
        let row = sqlx::query(
            "SELECT data, created_at, updated_at FROM ai_mentor_judgements WHERE progress_id = ?",
        )
        .bind(progress_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<AiMentorRecord> {
            let data: String = row.try_get("data")?;
            Ok(AiMentorRecord {
                progress_id,
                judgement: serde_json::from_str(&data)?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn save_ai_mentor_record(&mut self, record: &AiMentorRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO ai_mentor_judgements (progress_id, data, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (progress_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(record.progress_id.to_string())
        .bind(serde_json::to_string(&record.judgement)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn load_chapter_progress(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
    ) -> Result<Option<ChapterProgress>> {
        let row =
            sqlx::query("SELECT * FROM chapter_progress WHERE student_id = ? AND chapter_id = ?")
                .bind(student_id.to_string())
                .bind(chapter_id.to_string())
                .fetch_optional(&mut *self.tx)
                .await?;

        row.as_ref().map(chapter_progress_from_row).transpose()
    }

    async fn upsert_chapter_progress(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        course_id: CourseId,
        completed_lesson_count: u32,
        completed_as_freemium: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chapter_progress (student_id, chapter_id, course_id,
                completed_lesson_count, completed_at, completed_as_freemium, updated_at)
             VALUES (?, ?, ?, ?, NULL, ?, ?)
             ON CONFLICT (student_id, chapter_id) DO UPDATE SET
                completed_lesson_count = excluded.completed_lesson_count,
                completed_as_freemium = excluded.completed_as_freemium,
                updated_at = excluded.updated_at",
        )
        .bind(student_id.to_string())
        .bind(chapter_id.to_string())
        .bind(course_id.to_string())
        .bind(i64::from(completed_lesson_count))
        .bind(completed_as_freemium)
        .bind(chrono::Utc::now())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_chapter_completed(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        completed_at: Time,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chapter_progress SET completed_at = ?
             WHERE student_id = ? AND chapter_id = ? AND completed_at IS NULL",
        )
        .bind(completed_at)
        .bind(student_id.to_string())
        .bind(chapter_id.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_finished_chapters(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT chapter_id) FROM chapter_progress
             WHERE student_id = ? AND course_id = ? AND completed_at IS NOT NULL",
        )
        .bind(student_id.to_string())
        .bind(course_id.to_string())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count as u32)
    }

    async fn list_chapter_progress(
        &mut self,
        student_id: StudentId,
    ) -> Result<Vec<ChapterProgress>> {
        let rows =
            sqlx::query("SELECT * FROM chapter_progress WHERE student_id = ? ORDER BY chapter_id")
                .bind(student_id.to_string())
                .fetch_all(&mut *self.tx)
                .await?;
        rows.iter().map(chapter_progress_from_row).collect()
    }

    async fn load_certificate(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<Certificate>> {
        let row = sqlx::query(
            "SELECT id, issued_at FROM certificates WHERE student_id = ? AND course_id = ?",
        )
        .bind(student_id.to_string())
        .bind(course_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| -> Result<Certificate> {
            Ok(Certificate {
                id: parse(row.try_get("id")?)?,
                student_id,
                course_id,
                issued_at: row.try_get("issued_at")?,
            })
        })
        .transpose()
    }

    async fn insert_certificate(&mut self, certificate: &Certificate) -> Result<()> {
        sqlx::query(
            "INSERT INTO certificates (id, student_id, course_id, issued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(certificate.id.to_string())
        .bind(certificate.student_id.to_string())
        .bind(certificate.course_id.to_string())
        .bind(certificate.issued_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                format!(
                    "certificate for student {} course {}",
                    certificate.student_id, certificate.course_id
                ),
            )
        })?;
        Ok(())
    }

    async fn increment_course_stat(&mut self, course_id: CourseId, stat: CourseStat) -> Result<()> {
        sqlx::query(
            "INSERT INTO course_stats (course_id, stat, value) VALUES (?, ?, 1)
             ON CONFLICT (course_id, stat) DO UPDATE SET value = value + 1",
        )
        .bind(course_id.to_string())
        .bind(stat.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn load_course_stat(&mut self, course_id: CourseId, stat: CourseStat) -> Result<u64> {
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT value FROM course_stats WHERE course_id = ? AND stat = ?",
        )
        .bind(course_id.to_string())
        .bind(stat.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(value.unwrap_or(0) as u64)
    }

    async fn enqueue_event(&mut self, event: &Event) -> Result<()> {
        sqlx::query("INSERT INTO outbox (id, data, created_at) VALUES (?, ?, ?)")
            .bind(event.id.to_string())
            .bind(serde_json::to_string(event)?)
            .bind(event.timestamp)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.commit().await?;
        debug!("Committed sqlite transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.rollback().await?;
        debug!("Rolled back sqlite transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonflow_core::{ActorId, DomainEvent, LessonType};

    fn sample_lesson(chapter_id: ChapterId) -> Lesson {
        Lesson {
            id: LessonId::new(),
            chapter_id,
            title: "Ownership".to_string(),
            lesson_type: LessonType::Quiz,
            base_language: "en".to_string(),
            available_locales: vec!["en".to_string(), "pl".to_string()],
            attempts_limit: Some(2),
            quiz_cooldown_hours: None,
        }
    }

    #[tokio::test]
    async fn test_content_round_trip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let lesson = sample_lesson(ChapterId::new());

        let mut tx = storage.begin().await.unwrap();
        tx.save_lesson(&lesson).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.load_lesson(lesson.id).await.unwrap(), Some(lesson));
        assert!(tx.load_lesson(LessonId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_lesson_completion() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let row = LessonProgress::new(StudentId::new(), LessonId::new(), ChapterId::new());

        let mut tx = storage.begin().await.unwrap();
        tx.insert_lesson_progress(&row).await.unwrap();
        assert!(tx.mark_lesson_completed(row.id, chrono::Utc::now()).await.unwrap());
        assert!(!tx.mark_lesson_completed(row.id, chrono::Utc::now()).await.unwrap());
        assert_eq!(tx.count_completed_lessons(row.student_id, row.chapter_id).await.unwrap(), 1);

        let mut duplicate = row.clone();
        duplicate.id = ProgressId::new();
        let err = tx.insert_lesson_progress(&duplicate).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_enrollment_completion_merges_language() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let student_id = StudentId::new();
        let course_id = CourseId::new();
        let mut enrollment = StudentCourseEnrollment::enrolled(student_id, course_id);
        enrollment
            .completion_metadata
            .insert("source".to_string(), "checkout".to_string());

        let mut tx = storage.begin().await.unwrap();
        tx.save_enrollment(&enrollment).await.unwrap();
        assert!(tx.mark_enrollment_in_progress(student_id, course_id, 0).await.unwrap());
        assert!(tx
            .complete_enrollment(student_id, course_id, 3, chrono::Utc::now(), "pl")
            .await
            .unwrap());
        assert!(!tx
            .complete_enrollment(student_id, course_id, 3, chrono::Utc::now(), "en")
            .await
            .unwrap());

        let loaded = tx.load_enrollment(student_id, course_id).await.unwrap().unwrap();
        assert_eq!(loaded.progress, CourseProgress::Completed);
        assert_eq!(loaded.finished_chapter_count, 3);
        assert_eq!(loaded.completion_metadata.get("source").map(String::as_str), Some("checkout"));
        assert_eq!(
            loaded.completion_metadata.get(COMPLETED_LANGUAGE_KEY).map(String::as_str),
            Some("pl")
        );
    }

    #[tokio::test]
    async fn test_chapter_upsert_keeps_completion() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let student_id = StudentId::new();
        let chapter_id = ChapterId::new();
        let course_id = CourseId::new();

        let mut tx = storage.begin().await.unwrap();
        tx.upsert_chapter_progress(student_id, chapter_id, course_id, 2, false).await.unwrap();
        let now = chrono::Utc::now();
        assert!(tx.mark_chapter_completed(student_id, chapter_id, now).await.unwrap());
        tx.upsert_chapter_progress(student_id, chapter_id, course_id, 2, false).await.unwrap();
        assert!(!tx.mark_chapter_completed(student_id, chapter_id, now).await.unwrap());
        assert_eq!(tx.count_finished_chapters(student_id, course_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outbox_survives_only_commit() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let event = Event::new(
            ActorId::system(),
            DomainEvent::LessonCompleted {
                student_id: StudentId::new(),
                course_id: CourseId::new(),
                lesson_id: LessonId::new(),
            },
        );

        let mut tx = storage.begin().await.unwrap();
        tx.enqueue_event(&event).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(storage.pending_events(10).await.unwrap().is_empty());

        let mut tx = storage.begin().await.unwrap();
        tx.enqueue_event(&event).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(storage.pending_events(10).await.unwrap(), vec![event.clone()]);

        storage.mark_events_dispatched(&[event.id]).await.unwrap();
        assert!(storage.pending_events(10).await.unwrap().is_empty());

        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert_eq!(storage.prune_dispatched_events(past).await.unwrap(), 0);
        let future = chrono::Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(storage.prune_dispatched_events(future).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.db");
        let student = Student {
            id: StudentId::new(),
            name: "Ada".to_string(),
            deleted_at: None,
        };

        {
            let storage = SqliteStorage::new_from_path(&path).await.unwrap();
            let mut tx = storage.begin().await.unwrap();
            tx.save_student(&student).await.unwrap();
            tx.commit().await.unwrap();
        }

        let storage = SqliteStorage::new_from_path(&path).await.unwrap();
        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.load_student(student.id).await.unwrap(), Some(student));
    }
}
