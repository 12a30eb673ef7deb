//! In-memory storage implementation.
//!
//! Each transaction takes the store lock, works on a private copy of the
//! state and swaps it in on commit. Transactions are therefore serialized,
//! which is enough for tests, demos and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use lessonflow_core::{
    AiMentorRecord, Certificate, Chapter, ChapterId, ChapterProgress, Course, CourseId,
    CourseProgress, CourseStat, EnrollmentStatus, Event, EventId, Lesson, LessonId,
    LessonProgress, ProgressId, Student, StudentCourseEnrollment, StudentId, Time,
    COMPLETED_LANGUAGE_KEY,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::trait_::{Result, Storage, StorageError, Transaction};

#[derive(Debug, Clone)]
struct OutboxEntry {
    event: Event,
    dispatched_at: Option<Time>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    courses: HashMap<CourseId, Course>,
    chapters: HashMap<ChapterId, Chapter>,
    lessons: HashMap<LessonId, Lesson>,
    students: HashMap<StudentId, Student>,
    enrollments: HashMap<(StudentId, CourseId), StudentCourseEnrollment>,
    lesson_progress: HashMap<ProgressId, LessonProgress>,
    ai_mentor: HashMap<ProgressId, AiMentorRecord>,
    chapter_progress: HashMap<(StudentId, ChapterId), ChapterProgress>,
    certificates: HashMap<(StudentId, CourseId), Certificate>,
    stats: BTreeMap<(CourseId, CourseStat), u64>,
    outbox: Vec<OutboxEntry>,
}

impl MemoryState {
    fn find_lesson_progress(
        &self,
        student_id: StudentId,
        lesson_id: LessonId,
        chapter_id: ChapterId,
    ) -> Option<&LessonProgress> {
        self.lesson_progress.values().find(|p| {
            p.student_id == student_id && p.lesson_id == lesson_id && p.chapter_id == chapter_id
        })
    }
}

/// Process-local storage backend.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.dispatched_at.is_none())
            .take(limit)
            .map(|e| e.event.clone())
            .collect())
    }

    async fn mark_events_dispatched(&self, ids: &[EventId]) -> Result<()> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().await;
        for entry in state.outbox.iter_mut() {
            if entry.dispatched_at.is_none() && ids.contains(&entry.event.id) {
                entry.dispatched_at = Some(now);
            }
        }
        Ok(())
    }

    async fn prune_dispatched_events(&self, before: Time) -> Result<usize> {
        let mut state = self.state.lock().await;
        let len = state.outbox.len();
        state
            .outbox
            .retain(|e| e.dispatched_at.map_or(true, |at| at >= before));
        Ok(len - state.outbox.len())
    }
}

/// Transaction over [`MemoryStorage`].
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn load_course(&mut self, id: CourseId) -> Result<Option<Course>> {
        Ok(self.working.courses.get(&id).cloned())
    }

    async fn load_chapter(&mut self, id: ChapterId) -> Result<Option<Chapter>> {
        Ok(self.working.chapters.get(&id).cloned())
    }

    async fn load_lesson(&mut self, id: LessonId) -> Result<Option<Lesson>> {
        Ok(self.working.lessons.get(&id).cloned())
    }

    async fn load_student(&mut self, id: StudentId) -> Result<Option<Student>> {
        Ok(self.working.students.get(&id).cloned())
    }

    async fn save_course(&mut self, course: &Course) -> Result<()> {
        self.working.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn save_chapter(&mut self, chapter: &Chapter) -> Result<()> {
        self.working.chapters.insert(chapter.id, chapter.clone());
        Ok(())
    }

    async fn save_lesson(&mut self, lesson: &Lesson) -> Result<()> {
        self.working.lessons.insert(lesson.id, lesson.clone());
        Ok(())
    }

    async fn save_student(&mut self, student: &Student) -> Result<()> {
        self.working.students.insert(student.id, student.clone());
        Ok(())
    }

    async fn load_enrollment(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<StudentCourseEnrollment>> {
        Ok(self.working.enrollments.get(&(student_id, course_id)).cloned())
    }

    async fn save_enrollment(&mut self, enrollment: &StudentCourseEnrollment) -> Result<()> {
        self.working
            .enrollments
            .insert((enrollment.student_id, enrollment.course_id), enrollment.clone());
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
        let Some(enrollment) = self.working.enrollments.get_mut(&(student_id, course_id)) else {
            return Ok(false);
        };
        if enrollment.status != EnrollmentStatus::Enrolled
            || enrollment.progress == CourseProgress::Completed
        {
            return Ok(false);
        }
        enrollment.progress = CourseProgress::Completed;
        enrollment.completed_at = Some(completed_at);
        enrollment.finished_chapter_count = finished_chapter_count;
        enrollment
            .completion_metadata
            .insert(COMPLETED_LANGUAGE_KEY.to_string(), language.to_string());
        Ok(true)
    }

    async fn mark_enrollment_in_progress(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
        finished_chapter_count: u32,
    ) -> Result<bool> {
        let Some(enrollment) = self.working.enrollments.get_mut(&(student_id, course_id)) else {
            return Ok(false);
        };
        if enrollment.status != EnrollmentStatus::Enrolled
            || enrollment.progress == CourseProgress::Completed
        {
            return Ok(false);
        }
        enrollment.progress = CourseProgress::InProgress;
        enrollment.finished_chapter_count = finished_chapter_count;
        Ok(true)
    }

    async fn load_lesson_progress(
        &mut self,
        student_id: StudentId,
        lesson_id: LessonId,
        chapter_id: ChapterId,
    ) -> Result<Option<LessonProgress>> {
        Ok(self
            .working
            .find_lesson_progress(student_id, lesson_id, chapter_id)
            .cloned())
    }

    async fn insert_lesson_progress(&mut self, progress: &LessonProgress) -> Result<()> {
        if self
            .working
            .find_lesson_progress(progress.student_id, progress.lesson_id, progress.chapter_id)
            .is_some()
        {
            return Err(StorageError::Conflict(format!(
                "lesson progress for student {} lesson {}",
                progress.student_id, progress.lesson_id
            )));
        }
        self.working.lesson_progress.insert(progress.id, progress.clone());
        Ok(())
    }

    async fn update_lesson_progress(&mut self, progress: &LessonProgress) -> Result<()> {
        match self.working.lesson_progress.get_mut(&progress.id) {
            Some(row) => {
                *row = progress.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("lesson progress {}", progress.id))),
        }
    }

    async fn mark_lesson_completed(&mut self, id: ProgressId, completed_at: Time) -> Result<bool> {
        match self.working.lesson_progress.get_mut(&id) {
            Some(row) if row.completed_at.is_none() => {
                row.completed_at = Some(completed_at);
                row.updated_at = completed_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_completed_lessons(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
    ) -> Result<u32> {
        let count = self
            .working
            .lesson_progress
            .values()
            .filter(|p| {
                p.student_id == student_id && p.chapter_id == chapter_id && p.completed_at.is_some()
            })
            .count();
        Ok(count as u32)
    }

    async fn list_lesson_progress(&mut self, student_id: StudentId) -> Result<Vec<LessonProgress>> {
        let mut rows: Vec<_> = self
            .working
            .lesson_progress
            .values()
            .filter(|p| p.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.id);
        Ok(rows)
    }

    async fn load_ai_mentor_record(
        &mut self,
        progress_id: ProgressId,
    ) -> Result<Option<AiMentorRecord>> {
        Ok(self.working.ai_mentor.get(&progress_id).cloned())
    }

    async fn save_ai_mentor_record(&mut self, record: &AiMentorRecord) -> Result<()> {
        self.working.ai_mentor.insert(record.progress_id, record.clone());
        Ok(())
    }

    async fn load_chapter_progress(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
    ) -> Result<Option<ChapterProgress>> {
        Ok(self.working.chapter_progress.get(&(student_id, chapter_id)).cloned())
    }

    async fn upsert_chapter_progress(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        course_id: CourseId,
        completed_lesson_count: u32,
        completed_as_freemium: bool,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let row = self
            .working
            .chapter_progress
            .entry((student_id, chapter_id))
            .or_insert_with(|| ChapterProgress {
                student_id,
                chapter_id,
                course_id,
                completed_lesson_count: 0,
                completed_at: None,
                completed_as_freemium,
                updated_at: now,
            });
        row.completed_lesson_count = completed_lesson_count;
        row.completed_as_freemium = completed_as_freemium;
        row.updated_at = now;
        Ok(())
    }

    async fn mark_chapter_completed(
        &mut self,
        student_id: StudentId,
        chapter_id: ChapterId,
        completed_at: Time,
    ) -> Result<bool> {
        match self.working.chapter_progress.get_mut(&(student_id, chapter_id)) {
            Some(row) if row.completed_at.is_none() => {
                row.completed_at = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_finished_chapters(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<u32> {
        let count = self
            .working
            .chapter_progress
            .values()
            .filter(|c| {
                c.student_id == student_id && c.course_id == course_id && c.completed_at.is_some()
            })
            .count();
        Ok(count as u32)
    }

    async fn list_chapter_progress(
        &mut self,
        student_id: StudentId,
    ) -> Result<Vec<ChapterProgress>> {
        let mut rows: Vec<_> = self
            .working
            .chapter_progress
            .values()
            .filter(|c| c.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.chapter_id);
        Ok(rows)
    }

    async fn load_certificate(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<Certificate>> {
        Ok(self.working.certificates.get(&(student_id, course_id)).cloned())
    }

    async fn insert_certificate(&mut self, certificate: &Certificate) -> Result<()> {
        let key = (certificate.student_id, certificate.course_id);
        if self.working.certificates.contains_key(&key) {
            return Err(StorageError::Conflict(format!(
                "certificate for student {} course {}",
                certificate.student_id, certificate.course_id
            )));
        }
        self.working.certificates.insert(key, certificate.clone());
        Ok(())
    }

    async fn increment_course_stat(&mut self, course_id: CourseId, stat: CourseStat) -> Result<()> {
        *self.working.stats.entry((course_id, stat)).or_insert(0) += 1;
        Ok(())
    }

    async fn load_course_stat(&mut self, course_id: CourseId, stat: CourseStat) -> Result<u64> {
        Ok(self.working.stats.get(&(course_id, stat)).copied().unwrap_or(0))
    }

    async fn enqueue_event(&mut self, event: &Event) -> Result<()> {
        self.working.outbox.push(OutboxEntry {
            event: event.clone(),
            dispatched_at: None,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        debug!("Committed memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Rolled back memory transaction");
        Ok(())
    }
}
