use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{warn, Level};
use uuid::Uuid;

mod app;
mod attendance;
mod config;
mod db;
mod error;
mod grid;
mod models;
mod remediation;
mod report;
mod risk;
mod store;
mod timeline;
mod wire;

use app::{App, AssessmentDraft, BatchReport, Confirmation, RemediationOutcome};
use error::AppError;
use models::{AssessmentStatus, ClassDailyLog, ClassGroup, Notice, NoticePriority, RecordStatus, Student, TERMS};
use store::{FallbackStore, TableStore};

#[derive(Parser)]
#[command(name = "school-remediation")]
#[command(about = "Assessment and remediation (reforço) tracking for a school", long_about = None)]
struct Cli {
    /// Postgres connection string; omit to work from the local mirror only
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,
    #[arg(long, env = "SCHOOL_MIRROR_PATH", default_value = "school-mirror.json", global = true)]
    mirror_path: PathBuf,
    #[arg(long, default_value_t = 5, global = true)]
    max_connections: u32,
    #[arg(long, default_value_t = 3, global = true)]
    acquire_timeout_secs: u64,
    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: Level,
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn settings(&self) -> config::Settings {
        config::Settings {
            database_url: self.database_url.clone(),
            mirror_path: self.mirror_path.clone(),
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    #[command(flatten)]
    School(SchoolCommand),
}

#[derive(Subcommand)]
enum SchoolCommand {
    /// Load a sample school
    Seed,
    /// Report whether the remote database is reachable
    Status,
    /// Check a user's credentials
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Register a class
    AddClass {
        #[arg(long)]
        name: String,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        shift: Option<String>,
        #[arg(long = "teacher")]
        teachers: Vec<String>,
        /// Dedicated remediation class
        #[arg(long)]
        remediation: bool,
        #[arg(long = "focus-skill")]
        focus_skills: Vec<String>,
    },
    /// Enroll a student in a class
    AddStudent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        registration: Option<String>,
        #[arg(long)]
        birth_date: Option<NaiveDate>,
        #[arg(long)]
        parent_name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Mark a student inactive
    DeactivateStudent {
        #[arg(long)]
        student: String,
    },
    /// Remove a student without assessments
    DeleteStudent {
        #[arg(long)]
        student: String,
    },
    /// Record one assessment and update the student's remediation status
    Assess {
        #[arg(long)]
        student: String,
        #[arg(long)]
        skill: String,
        #[arg(long, default_value = TERMS[0])]
        term: String,
        #[arg(long, value_parser = parse_status)]
        status: AssessmentStatus,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Overwrite this assessment instead of adding one
        #[arg(long)]
        id: Option<String>,
        /// Defaults to the attendance-based suggestion
        #[arg(long)]
        participation: Option<f64>,
        #[arg(long)]
        behavior: Option<f64>,
        #[arg(long)]
        exam: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    DeleteAssessment {
        #[arg(long)]
        id: String,
    },
    /// Show the grade-entry grid, or save it with edits from a CSV file
    Grid {
        #[arg(long)]
        class: String,
        #[arg(long)]
        skill: String,
        #[arg(long, default_value = TERMS[0])]
        term: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Columns: student_id,status[,participation_score,behavior_score,exam_score,notes]
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Import skills from a CSV file (code,description,subject[,year,id])
    ImportSkills {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Move a student into a remediation class
    Enroll {
        #[arg(long)]
        student: String,
        #[arg(long)]
        class: String,
    },
    /// Close a student's remediation episode
    Finish {
        #[arg(long)]
        student: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Record a class diary entry with attendance
    LogAttendance {
        #[arg(long)]
        class: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long = "present", value_delimiter = ',')]
        present: Vec<String>,
        #[arg(long = "absent", value_delimiter = ',')]
        absent: Vec<String>,
    },
    PostNotice {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long)]
        high_priority: bool,
        #[arg(long)]
        author: Option<String>,
    },
    Notices {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List students at risk, grouped by class
    Risk {
        #[arg(long)]
        class: Option<String>,
    },
    /// Attendance percentages for a class
    Attendance {
        #[arg(long)]
        class: String,
    },
    ReportCard {
        #[arg(long)]
        student: String,
    },
    Timeline {
        #[arg(long)]
        student: String,
    },
    /// Time spent in remediation per student
    Permanence,
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn parse_status(raw: &str) -> Result<AssessmentStatus, String> {
    AssessmentStatus::parse(raw)
        .ok_or_else(|| format!("expected NOT_MET, DEVELOPING, MET or EXCEEDED, got {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_tracing(cli.log_json, cli.log_level);
    let settings = cli.settings();

    let command = match cli.command {
        Commands::InitDb => {
            let url = settings
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to initialise the schema")?;
            let remote = store::PgStore::connect_lazy(
                url,
                settings.max_connections,
                settings.acquire_timeout,
            )?;
            db::init_db(remote.pool()).await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::School(command) => command,
    };

    let store = settings.open_store()?;
    let mut app = App::load(store)
        .await
        .context("failed to load school data")?;
    if app.is_offline() {
        warn!(event = "app.offline", mirror = %settings.mirror_path.display());
    }
    run(&mut app, command).await
}

async fn run(app: &mut App<FallbackStore>, command: SchoolCommand) -> anyhow::Result<()> {
    match command {
        SchoolCommand::Seed => {
            let inserted = db::seed(app.store()).await?;
            app.refresh().await?;
            println!("Seed data inserted ({inserted} records).");
        }
        SchoolCommand::Status => {
            if app.store().remote().is_none() {
                println!("No database configured; using the local mirror.");
            } else if app.store().check_connection().await {
                println!("Remote database reachable.");
            } else {
                println!("Working offline from the local mirror.");
            }
        }
        SchoolCommand::Login { email, password } => {
            let served = app.login(&email, &password).await?;
            let source = served.served_by();
            match served.into_inner() {
                Some(user) => println!("Welcome, {} ({}) [{}].", user.name, user.role, source),
                None => println!("Invalid email or password."),
            }
        }
        SchoolCommand::AddClass {
            name,
            grade,
            year,
            shift,
            teachers,
            remediation,
            focus_skills,
        } => {
            let id = Uuid::new_v4().to_string();
            let served = app
                .add_class(ClassGroup {
                    id: id.clone(),
                    name,
                    grade,
                    year,
                    shift,
                    teacher_ids: teachers,
                    is_remediation: remediation,
                    focus_skills,
                    status: RecordStatus::Active,
                })
                .await?;
            println!("Class {id} created [{}].", served.served_by());
        }
        SchoolCommand::AddStudent {
            name,
            class,
            registration,
            birth_date,
            parent_name,
            phone,
        } => {
            let id = Uuid::new_v4().to_string();
            let served = app
                .add_student(Student {
                    id: id.clone(),
                    name,
                    class_id: class,
                    avatar_url: None,
                    registration_number: registration,
                    birth_date,
                    parent_name,
                    phone,
                    status: RecordStatus::Active,
                    remediation_entry_date: None,
                    remediation_exit_date: None,
                })
                .await?;
            println!("Student {id} enrolled [{}].", served.served_by());
        }
        SchoolCommand::DeactivateStudent { student } => {
            app.deactivate_student(&student).await?;
            println!("Student {student} deactivated.");
        }
        SchoolCommand::DeleteStudent { student } => {
            app.delete_student(&student).await?;
            println!("Student {student} deleted.");
        }
        SchoolCommand::Assess {
            student,
            skill,
            term,
            status,
            date,
            id,
            participation,
            behavior,
            exam,
            notes,
        } => {
            // The attendance suggestion only pre-fills new assessments.
            let state = app.state();
            let is_update = id
                .as_deref()
                .is_some_and(|id| state.assessments.iter().any(|a| a.id == id));
            let suggestion = if is_update {
                None
            } else {
                state.student(&student).and_then(|s| {
                    attendance::participation_suggestion(&s.id, &s.class_id, &state.daily_logs)
                })
            };
            let saved = app
                .save_assessment(AssessmentDraft {
                    id,
                    student_id: student.clone(),
                    skill_id: skill,
                    term,
                    status: Some(status),
                    date,
                    notes,
                    participation_score: participation.or(suggestion),
                    behavior_score: behavior,
                    exam_score: exam,
                })
                .await?;
            println!(
                "Assessment {} saved [{}].",
                saved.assessment_id,
                saved.served.served_by()
            );
            print_remediation(&student, &saved.remediation);
        }
        SchoolCommand::DeleteAssessment { id } => {
            app.delete_assessment(&id).await?;
            println!("Assessment {id} deleted.");
        }
        SchoolCommand::Grid {
            class,
            skill,
            term,
            date,
            csv,
        } => {
            let date = date.unwrap_or_else(|| app.today());
            let mut grid = grid::GradeGrid::build(app.state(), &class, &skill, &term, date)?;
            match csv {
                None => {
                    println!("Grid for {class} / {skill} / {term}:");
                    for row in &grid.rows {
                        println!(
                            "- {} ({}) status {} participation {} behavior {} exam {}",
                            row.student_name,
                            row.student_id,
                            row.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                            fmt_score(row.participation_score),
                            fmt_score(row.behavior_score),
                            fmt_score(row.exam_score),
                        );
                    }
                }
                Some(path) => {
                    let edits = grid::read_edits_csv(&path)?;
                    grid.apply(&edits)?;
                    match app.save_grade_grid(&grid).await {
                        Ok(report) => print_batch("Grid saved", &report),
                        Err(AppError::PartialBatch(report)) => {
                            print_batch("Grid partially saved", &report);
                            return Err(AppError::PartialBatch(report).into());
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }
        SchoolCommand::ImportSkills { csv } => {
            let skills = db::read_skills_csv(&csv)?;
            match app.import_skills(skills).await {
                Ok(report) => print_batch("Skills imported", &report),
                Err(AppError::PartialBatch(report)) => {
                    print_batch("Skills partially imported", &report);
                    return Err(AppError::PartialBatch(report).into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        SchoolCommand::Enroll { student, class } => {
            match app.enroll_in_remediation(&student, &class).await? {
                Some(served) => println!(
                    "Student {student} moved to remediation class {class} [{}].",
                    served.served_by()
                ),
                None => println!("Student {student} is already in remediation class {class}."),
            }
        }
        SchoolCommand::Finish { student, yes } => {
            let confirmation = if yes || confirm(&format!("Finish remediation for {student}?"))? {
                Confirmation::Confirmed
            } else {
                Confirmation::Pending
            };
            match app.finish_remediation(&student, confirmation).await {
                Ok(Some(served)) => {
                    println!("Remediation finished for {student} [{}].", served.served_by())
                }
                Ok(None) => println!("Student {student} has no open remediation episode."),
                Err(AppError::ConfirmationRequired) => println!("Cancelled."),
                Err(err) => return Err(err.into()),
            }
        }
        SchoolCommand::LogAttendance {
            class,
            date,
            content,
            present,
            absent,
        } => {
            let mut attendance: std::collections::BTreeMap<String, bool> =
                absent.into_iter().map(|id| (id, false)).collect();
            attendance.extend(present.into_iter().map(|id| (id, true)));
            let date = date.unwrap_or_else(|| app.today());
            let served = app
                .record_daily_log(ClassDailyLog {
                    id: Uuid::new_v4().to_string(),
                    class_id: class.clone(),
                    date: Some(date),
                    content,
                    attendance,
                })
                .await?;
            println!("Diary entry recorded for {class} [{}].", served.served_by());
        }
        SchoolCommand::PostNotice {
            title,
            content,
            high_priority,
            author,
        } => {
            let today = app.today();
            let served = app
                .post_notice(Notice {
                    id: Uuid::new_v4().to_string(),
                    title,
                    content,
                    date: Some(today),
                    priority: if high_priority {
                        NoticePriority::High
                    } else {
                        NoticePriority::Normal
                    },
                    author,
                })
                .await?;
            println!("Notice posted [{}].", served.served_by());
        }
        SchoolCommand::Notices { limit } => {
            let mut notices = app.state().notices.clone();
            notices.sort_by(|a, b| b.date.cmp(&a.date));
            if notices.is_empty() {
                println!("No notices posted.");
            }
            for notice in notices.iter().take(limit) {
                let marker = match notice.priority {
                    NoticePriority::High => "!",
                    NoticePriority::Normal => "-",
                };
                println!(
                    "{} {} {}: {}",
                    marker,
                    notice.date.map(|d| d.to_string()).unwrap_or_default(),
                    notice.title,
                    notice.content
                );
            }
        }
        SchoolCommand::Risk { class } => {
            let state = app.state();
            let groups: Vec<_> =
                risk::risk_groups(&state.assessments, &state.students, &state.classes, &state.skills)
                    .into_iter()
                    .filter(|g| class.as_deref().map_or(true, |c| g.class_id == c))
                    .collect();
            if groups.is_empty() {
                println!("No students at risk.");
            }
            for group in &groups {
                println!("{}:", group.class_name());
                for item in &group.items {
                    let skill = item
                        .skill
                        .map(|k| k.code.clone())
                        .unwrap_or_else(|| item.assessment.skill_id.clone());
                    println!(
                        "- {} {} {} ({})",
                        item.student.name, skill, item.assessment.status, item.assessment.term
                    );
                }
            }
        }
        SchoolCommand::Attendance { class } => {
            let state = app.state();
            for row in attendance::class_attendance(&class, &state.students, &state.daily_logs) {
                let pct = row
                    .percentage
                    .map(|p| format!("{p}%"))
                    .unwrap_or_else(|| "n/a".to_string());
                println!("- {} ({}): {}", row.student_name, row.student_id, pct);
            }
        }
        SchoolCommand::ReportCard { student } => {
            let state = app.state();
            let student = state
                .student(&student)
                .with_context(|| format!("unknown student {student}"))?;
            println!("Report card for {}", student.name);
            println!("Subject | {}", TERMS.join(" | "));
            for row in report::report_card(&student.id, &TERMS, &state.assessments, &state.skills) {
                let cells: Vec<String> = row
                    .cells
                    .iter()
                    .map(|cell| match cell {
                        Some(cell) => format!("{}/{} {:?}", cell.success, cell.total, cell.tone),
                        None => "-".to_string(),
                    })
                    .collect();
                println!("{} | {}", row.subject, cells.join(" | "));
            }
        }
        SchoolCommand::Timeline { student } => {
            let state = app.state();
            let student = state
                .student(&student)
                .with_context(|| format!("unknown student {student}"))?;
            for event in timeline::build_timeline(student, &state.assessments) {
                let date = event.date.map(|d| d.to_string()).unwrap_or_else(|| "????-??-??".to_string());
                match event.kind {
                    timeline::TimelineKind::Assessment {
                        skill_id,
                        term,
                        status,
                        ..
                    } => {
                        let skill = state.skill(&skill_id).map(|k| k.code.as_str()).unwrap_or(&skill_id);
                        println!("{date} {skill} {status} ({term})");
                    }
                    timeline::TimelineKind::RemediationEntry => println!("{date} entered remediation"),
                    timeline::TimelineKind::RemediationExit => println!("{date} left remediation"),
                }
            }
        }
        SchoolCommand::Permanence => {
            let rows = report::permanence(&app.state().students, app.today());
            if rows.is_empty() {
                println!("No remediation episodes recorded.");
            }
            for row in rows {
                let status = if row.open { "open" } else { "closed" };
                println!("- {}: {} days since {} ({status})", row.student_name, row.days, row.entry);
            }
        }
        SchoolCommand::Report { class, out } => {
            let report = report::build_report(app.state(), class.as_deref(), app.today());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn fmt_score(score: Option<f64>) -> String {
    score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".to_string())
}

fn print_remediation(student_id: &str, outcome: &RemediationOutcome) {
    match outcome {
        RemediationOutcome::Unchanged => {}
        RemediationOutcome::Applied { patch, served } => {
            let verb = match remediation::Transition::of(patch) {
                Some(remediation::Transition::Enter) => "entered",
                Some(remediation::Transition::Exit) => "left",
                None => "updated in",
            };
            println!("Student {student_id} {verb} remediation [{}].", served.served_by());
        }
        RemediationOutcome::Failed { error, .. } => {
            println!("Remediation status for {student_id} was NOT updated: {error}");
        }
    }
}

fn print_batch(label: &str, report: &BatchReport) {
    println!(
        "{label}: {} committed, {} failed.",
        report.committed.len(),
        report.failed.len()
    );
    for (id, error) in &report.failed {
        println!("- failed {id}: {error}");
    }
    for (student_id, outcome) in &report.remediation {
        print_remediation(student_id, outcome);
    }
    let unsynced = report.remediation.iter().filter(|(_, o)| o.is_failed()).count();
    if unsynced > 0 {
        println!("{unsynced} students need their remediation status rechecked.");
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "s" | "sim"
    ))
}
