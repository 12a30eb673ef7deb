//! Shared fixtures for the progress tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lessonflow_core::{
    Chapter, ChapterId, Course, CourseId, Event, Lesson, LessonId, LessonType, Student,
    StudentCourseEnrollment, StudentId,
};
use lessonflow_storage::{MemoryStorage, SqliteStorage, Storage};

use crate::error::{ProgressError, Result};
use crate::publisher::EventPublisher;
use crate::service::ProgressService;

/// Shape of one chapter in a fixture course.
pub(crate) struct ChapterShape {
    pub lesson_types: Vec<LessonType>,
    pub is_freemium: bool,
}

impl ChapterShape {
    pub fn content(lessons: usize) -> Self {
        Self::of(&vec![LessonType::Content; lessons])
    }

    pub fn freemium(lessons: usize) -> Self {
        Self {
            is_freemium: true,
            ..Self::content(lessons)
        }
    }

    pub fn of(lesson_types: &[LessonType]) -> Self {
        Self {
            lesson_types: lesson_types.to_vec(),
            is_freemium: false,
        }
    }
}

/// A seeded course with one student.
pub(crate) struct Fixture {
    pub storage: Arc<dyn Storage>,
    pub course: Course,
    pub chapters: Vec<Chapter>,
    /// Every lesson, chapter by chapter
    pub lessons: Vec<Lesson>,
    pub student: Student,
}

impl Fixture {
    pub async fn memory(chapters: &[ChapterShape], has_certificate: bool, enrolled: bool) -> Self {
        Self::seed(Arc::new(MemoryStorage::new()), chapters, has_certificate, enrolled).await
    }

    pub async fn sqlite(chapters: &[ChapterShape], has_certificate: bool, enrolled: bool) -> Self {
        let storage = SqliteStorage::in_memory().await.unwrap();
        Self::seed(Arc::new(storage), chapters, has_certificate, enrolled).await
    }

    /// Fixture backed by a SQLite file, for tests that need real locking.
    pub async fn sqlite_file(
        path: &Path,
        chapters: &[ChapterShape],
        has_certificate: bool,
        enrolled: bool,
    ) -> Self {
        let storage = SqliteStorage::new_from_path(path).await.unwrap();
        Self::seed(Arc::new(storage), chapters, has_certificate, enrolled).await
    }

    async fn seed(
        storage: Arc<dyn Storage>,
        shapes: &[ChapterShape],
        has_certificate: bool,
        enrolled: bool,
    ) -> Self {
        let course = Course {
            id: CourseId::new(),
            title: "Rust for learners".to_string(),
            chapter_count: shapes.len() as u32,
            has_certificate,
            base_language: "en".to_string(),
        };
        let student = Student {
            id: StudentId::new(),
            name: "Ada".to_string(),
            deleted_at: None,
        };

        let mut chapters = Vec::new();
        let mut lessons = Vec::new();
        for (i, shape) in shapes.iter().enumerate() {
            let chapter = Chapter {
                id: ChapterId::new(),
                course_id: course.id,
                title: format!("Chapter {}", i + 1),
                lesson_count: shape.lesson_types.len() as u32,
                is_freemium: shape.is_freemium,
            };
            for (j, lesson_type) in shape.lesson_types.iter().enumerate() {
                lessons.push(Lesson {
                    id: LessonId::new(),
                    chapter_id: chapter.id,
                    title: format!("Lesson {}.{}", i + 1, j + 1),
                    lesson_type: *lesson_type,
                    base_language: "en".to_string(),
                    available_locales: vec!["en".to_string(), "pl".to_string()],
                    attempts_limit: (*lesson_type == LessonType::Quiz).then_some(1),
                    quiz_cooldown_hours: None,
                });
            }
            chapters.push(chapter);
        }

        let mut tx = storage.begin().await.unwrap();
        tx.save_course(&course).await.unwrap();
        for chapter in &chapters {
            tx.save_chapter(chapter).await.unwrap();
        }
        for lesson in &lessons {
            tx.save_lesson(lesson).await.unwrap();
        }
        tx.save_student(&student).await.unwrap();
        if enrolled {
            tx.save_enrollment(&StudentCourseEnrollment::enrolled(student.id, course.id))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        Self {
            storage,
            course,
            chapters,
            lessons,
            student,
        }
    }

    /// Lessons of one chapter.
    pub fn lessons_of(&self, chapter: usize) -> Vec<&Lesson> {
        let id = self.chapters[chapter].id;
        self.lessons.iter().filter(|l| l.chapter_id == id).collect()
    }

    pub fn service(&self, publisher: Arc<RecordingPublisher>) -> ProgressService {
        ProgressService::new(self.storage.clone(), publisher)
    }
}

/// Publisher that keeps what it receives and can be told to fail.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
    failures: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// How many received events carry the given variant name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.payload.name() == name)
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &Event) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProgressError::Publish("injected failure".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
