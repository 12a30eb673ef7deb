//! lessonflow CLI - record and inspect lesson progress.

mod catalog;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lessonflow_core::{AiMentorJudgement, ChapterId, CourseId, LessonId, Role, StudentId};
use lessonflow_progress::{
    CompletionContext, ProgressConfig, ProgressService, QuizProgressUpdate, TracingEventPublisher,
};
use lessonflow_storage::SqliteStorage;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;

#[derive(Parser)]
#[command(name = "lessonflow")]
#[command(about = "Lesson progress and course completion engine", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, default_value = "lessonflow.db")]
    db: PathBuf,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load courses, chapters, lessons, students and enrollments
    Import {
        /// Catalog JSON file
        catalog: PathBuf,
    },
    /// Mark a lesson as started
    Start {
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        student: StudentId,
        /// student, admin or content_creator
        #[arg(long, default_value = "student")]
        role: Role,
    },
    /// Mark a lesson as completed
    Complete {
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        student: StudentId,
        #[arg(long, default_value = "student")]
        role: Role,
        /// Every quiz question was answered
        #[arg(long)]
        quiz_completed: bool,
        /// The quiz attempt passed
        #[arg(long)]
        quiz_passed: bool,
        /// Quiz questions answered
        #[arg(long, default_value = "0")]
        questions: u32,
        /// AI mentor verdict
        #[arg(long)]
        mentor_passed: Option<bool>,
        /// AI mentor explanation
        #[arg(long, default_value = "")]
        mentor_summary: String,
        /// Language the student used
        #[arg(long)]
        language: Option<String>,
    },
    /// Record a quiz attempt (retakes included)
    QuizProgress {
        #[arg(long)]
        chapter: ChapterId,
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        student: StudentId,
        #[arg(long, default_value = "0")]
        questions: u32,
        #[arg(long, default_value = "0")]
        score: u32,
        /// Attempt counter (see retake-check)
        #[arg(long)]
        attempts: u32,
        #[arg(long)]
        passed: bool,
        /// Leave the lesson completed; omit to clear it
        #[arg(long)]
        completed: bool,
        #[arg(long)]
        language: Option<String>,
    },
    /// Check whether a quiz may be retaken
    RetakeCheck {
        #[arg(long)]
        lesson: LessonId,
        #[arg(long)]
        student: StudentId,
    },
    /// Print a student's progress as JSON
    Show {
        #[arg(long)]
        student: StudentId,
        #[arg(long)]
        course: Option<CourseId>,
    },
    /// Publish pending events
    Dispatch,
    /// Delete dispatched events past the retention window
    Prune {
        /// Retention in hours, overriding the config file
        #[arg(long)]
        hours: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Commands::Prune { hours: Some(hours) } = &cli.command {
        config.outbox_retention_hours = *hours;
    }

    let storage = Arc::new(
        SqliteStorage::new_from_path(&cli.db)
            .await
            .with_context(|| format!("opening {}", cli.db.display()))?,
    );
    let service = ProgressService::new(storage.clone(), Arc::new(TracingEventPublisher))
        .with_config(config);

    match cli.command {
        Commands::Import { catalog } => {
            Catalog::from_path(&catalog)?.import(storage.as_ref()).await?;
        }
        Commands::Start {
            lesson,
            student,
            role,
        } => {
            let changed = service.mark_lesson_as_started(lesson, student, role).await?;
            print_json(&serde_json::json!({ "started": changed }))?;
        }
        Commands::Complete {
            lesson,
            student,
            role,
            quiz_completed,
            quiz_passed,
            questions,
            mentor_passed,
            mentor_summary,
            language,
        } => {
            let context = CompletionContext {
                quiz_completed,
                is_quiz_passed: quiz_passed,
                completed_question_count: questions,
                ai_mentor_judgement: mentor_passed.map(|passed| AiMentorJudgement {
                    passed,
                    summary: mentor_summary,
                    score: None,
                }),
                language,
            };
            let outcome = service
                .mark_lesson_as_completed(lesson, student, role, &context)
                .await?;
            print_json(&outcome)?;
        }
        Commands::QuizProgress {
            chapter,
            lesson,
            student,
            questions,
            score,
            attempts,
            passed,
            completed,
            language,
        } => {
            let update = QuizProgressUpdate {
                chapter_id: chapter,
                lesson_id: lesson,
                student_id: student,
                completed_question_count: questions,
                quiz_score: score,
                attempts,
                is_quiz_passed: passed,
                is_completed: completed,
                language_answered: language,
            };
            let transitioned = service.update_quiz_progress(&update).await?;
            print_json(&serde_json::json!({ "completed_now": transitioned }))?;
        }
        Commands::RetakeCheck { lesson, student } => {
            let decision = service.retake_eligibility(lesson, student).await?;
            print_json(&decision)?;
        }
        Commands::Show { student, course } => {
            let report = service.student_progress(student, course).await?;
            print_json(&report)?;
        }
        Commands::Dispatch => {
            let count = service.dispatch_events().await?;
            info!("Dispatched {} events", count);
        }
        Commands::Prune { .. } => {
            let count = service.prune_events().await?;
            info!("Pruned {} events", count);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ProgressConfig> {
    let Some(path) = path else {
        return Ok(ProgressConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), ProgressConfig::default());
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"dispatch_after_commit": false}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(!config.dispatch_after_commit);
        assert_eq!(config.outbox_batch_size, 100);
    }

    #[test]
    fn test_parse_complete_command() {
        let lesson = LessonId::new();
        let student = StudentId::new();
        let cli = Cli::try_parse_from([
            "lessonflow",
            "complete",
            "--lesson",
            &lesson.to_string(),
            "--student",
            &student.to_string(),
            "--quiz-completed",
            "--quiz-passed",
            "--role",
            "admin",
        ])
        .unwrap();

        match cli.command {
            Commands::Complete {
                lesson: l,
                role,
                quiz_completed,
                quiz_passed,
                ..
            } => {
                assert_eq!(l, lesson);
                assert_eq!(role, Role::Admin);
                assert!(quiz_completed && quiz_passed);
            }
            _ => panic!("expected complete"),
        }
        assert_eq!(cli.db, PathBuf::from("lessonflow.db"));
    }

    #[test]
    fn test_parse_prune_command() {
        let cli = Cli::try_parse_from(["lessonflow", "prune", "--hours", "24"]).unwrap();
        assert!(matches!(cli.command, Commands::Prune { hours: Some(24) }));

        let cli = Cli::try_parse_from(["lessonflow", "prune"]).unwrap();
        assert!(matches!(cli.command, Commands::Prune { hours: None }));
    }
}
