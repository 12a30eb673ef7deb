//! Content catalog import.

use std::path::Path;

use anyhow::{Context, Result};
use lessonflow_core::{
    Chapter, Course, CourseId, EnrollmentStatus, Lesson, Student, StudentCourseEnrollment,
    StudentId,
};
use lessonflow_storage::Storage;
use serde::Deserialize;
use tracing::{info, warn};

/// Courses, students and enrollments to load into the progress store.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub courses: Vec<Course>,
    pub chapters: Vec<Chapter>,
    pub lessons: Vec<Lesson>,
    pub students: Vec<Student>,
    pub enrollments: Vec<CatalogEnrollment>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogEnrollment {
    pub student_id: StudentId,
    pub course_id: CourseId,
    #[serde(default = "enrolled")]
    pub status: EnrollmentStatus,
}

fn enrolled() -> EnrollmentStatus {
    EnrollmentStatus::Enrolled
}

impl Catalog {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing catalog {}", path.display()))
    }

    /// Counts declared on courses and chapters must match what is listed.
    fn check_counts(&self) {
        for course in &self.courses {
            let listed = self.chapters.iter().filter(|c| c.course_id == course.id).count();
            if listed as u32 != course.chapter_count {
                warn!(course_id = %course.id, listed, declared = course.chapter_count, "Chapter count mismatch");
            }
        }
        for chapter in &self.chapters {
            let listed = self.lessons.iter().filter(|l| l.chapter_id == chapter.id).count();
            if listed as u32 != chapter.lesson_count {
                warn!(chapter_id = %chapter.id, listed, declared = chapter.lesson_count, "Lesson count mismatch");
            }
        }
    }

    /// Write everything in one transaction. Existing enrollments keep their progress.
    pub async fn import(&self, storage: &dyn Storage) -> Result<()> {
        self.check_counts();

        let mut tx = storage.begin().await?;
        for course in &self.courses {
            tx.save_course(course).await?;
        }
        for chapter in &self.chapters {
            tx.save_chapter(chapter).await?;
        }
        for lesson in &self.lessons {
            tx.save_lesson(lesson).await?;
        }
        for student in &self.students {
            tx.save_student(student).await?;
        }
        for entry in &self.enrollments {
            let mut enrollment = tx
                .load_enrollment(entry.student_id, entry.course_id)
                .await?
                .unwrap_or_else(|| {
                    StudentCourseEnrollment::enrolled(entry.student_id, entry.course_id)
                });
            enrollment.status = entry.status;
            tx.save_enrollment(&enrollment).await?;
        }
        tx.commit().await?;

        info!(
            courses = self.courses.len(),
            chapters = self.chapters.len(),
            lessons = self.lessons.len(),
            students = self.students.len(),
            enrollments = self.enrollments.len(),
            "Catalog imported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonflow_storage::MemoryStorage;

    #[tokio::test]
    async fn test_import_catalog() {
        let course_id = CourseId::new();
        let student_id = StudentId::new();
        let raw = format!(
            r#"{{
                "courses": [{{"id": "{course_id}", "title": "Intro", "chapter_count": 0,
                              "has_certificate": true, "base_language": "en"}}],
                "students": [{{"id": "{student_id}", "name": "Ada"}}],
                "enrollments": [{{"student_id": "{student_id}", "course_id": "{course_id}"}}]
            }}"#
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, raw).unwrap();

        let storage = MemoryStorage::new();
        Catalog::from_path(&path).unwrap().import(&storage).await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.load_course(course_id).await.unwrap().is_some());
        let enrollment = tx.load_enrollment(student_id, course_id).await.unwrap().unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Enrolled);
    }
}
