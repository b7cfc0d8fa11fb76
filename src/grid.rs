//! Batch grade entry: one row per active student of a class for a single
//! skill and term.

use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::SchoolState;
use crate::attendance;
use crate::error::{AppError, AppResult};
use crate::models::{latest_assessment, Assessment, AssessmentStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRow {
    pub student_id: String,
    pub student_name: String,
    /// Set when the row edits a stored assessment instead of adding one.
    pub existing_id: Option<String>,
    pub status: Option<AssessmentStatus>,
    pub participation_score: Option<f64>,
    pub behavior_score: Option<f64>,
    pub exam_score: Option<f64>,
    pub notes: Option<String>,
    /// Only edited rows are written back.
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeGrid {
    pub class_id: String,
    pub skill_id: String,
    pub term: String,
    pub date: NaiveDate,
    pub rows: Vec<GradeRow>,
}

/// One edited grid line, as read from a CSV file.
#[derive(Debug, Clone, Deserialize)]
pub struct GradeEdit {
    pub student_id: String,
    pub status: String,
    #[serde(default)]
    pub participation_score: Option<f64>,
    #[serde(default)]
    pub behavior_score: Option<f64>,
    #[serde(default)]
    pub exam_score: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl GradeGrid {
    /// Rows are prefilled from each student's latest assessment for the
    /// skill and term. New rows get the attendance suggestion as their
    /// participation score, computed here once.
    pub fn build(
        state: &SchoolState,
        class_id: &str,
        skill_id: &str,
        term: &str,
        date: NaiveDate,
    ) -> AppResult<Self> {
        if state.class(class_id).is_none() {
            return Err(AppError::validation(format!("unknown class {class_id}")));
        }
        if state.skill(skill_id).is_none() {
            return Err(AppError::validation(format!("unknown skill {skill_id}")));
        }

        let mut students: Vec<_> = state
            .students
            .iter()
            .filter(|s| s.class_id == class_id && s.is_active())
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));

        let rows = students
            .into_iter()
            .map(|student| {
                match latest_assessment(&state.assessments, &student.id, skill_id, term) {
                    Some(existing) => GradeRow {
                        student_id: student.id.clone(),
                        student_name: student.name.clone(),
                        existing_id: Some(existing.id.clone()),
                        status: Some(existing.status),
                        participation_score: existing.participation_score,
                        behavior_score: existing.behavior_score,
                        exam_score: existing.exam_score,
                        notes: existing.notes.clone(),
                        edited: false,
                    },
                    None => GradeRow {
                        student_id: student.id.clone(),
                        student_name: student.name.clone(),
                        existing_id: None,
                        status: None,
                        participation_score: attendance::participation_suggestion(
                            &student.id,
                            class_id,
                            &state.daily_logs,
                        ),
                        behavior_score: None,
                        exam_score: None,
                        notes: None,
                        edited: false,
                    },
                }
            })
            .collect();

        Ok(Self {
            class_id: class_id.to_string(),
            skill_id: skill_id.to_string(),
            term: term.to_string(),
            date,
            rows,
        })
    }

    pub fn row_mut(&mut self, student_id: &str) -> Option<&mut GradeRow> {
        self.rows.iter_mut().find(|row| row.student_id == student_id)
    }

    /// Applies edits on top of the prefilled rows. Scores left blank keep
    /// the prefilled value.
    pub fn apply(&mut self, edits: &[GradeEdit]) -> AppResult<()> {
        for edit in edits {
            let status = AssessmentStatus::parse(&edit.status).ok_or_else(|| {
                AppError::validation(format!(
                    "invalid status {:?} for student {}",
                    edit.status, edit.student_id
                ))
            })?;
            let row = self.row_mut(&edit.student_id).ok_or_else(|| {
                AppError::validation(format!("student {} is not in this grid", edit.student_id))
            })?;
            row.status = Some(status);
            row.edited = true;
            if edit.participation_score.is_some() {
                row.participation_score = edit.participation_score;
            }
            if edit.behavior_score.is_some() {
                row.behavior_score = edit.behavior_score;
            }
            if edit.exam_score.is_some() {
                row.exam_score = edit.exam_score;
            }
            if edit.notes.is_some() {
                row.notes = edit.notes.clone();
            }
        }
        Ok(())
    }

    /// Assessments to write. Rows nobody edited are left alone.
    pub fn to_assessments(&self) -> Vec<Assessment> {
        self.rows
            .iter()
            .filter(|row| row.edited)
            .filter_map(|row| {
                Some(Assessment {
                    id: row
                        .existing_id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    student_id: row.student_id.clone(),
                    skill_id: self.skill_id.clone(),
                    date: Some(self.date),
                    term: self.term.clone(),
                    status: row.status?,
                    notes: row.notes.clone(),
                    participation_score: row.participation_score,
                    behavior_score: row.behavior_score,
                    exam_score: row.exam_score,
                })
            })
            .collect()
    }

    pub fn is_update(&self, student_id: &str) -> bool {
        self.rows
            .iter()
            .any(|row| row.student_id == student_id && row.existing_id.is_some())
    }
}

pub fn read_edits_csv(path: &std::path::Path) -> anyhow::Result<Vec<GradeEdit>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut edits = Vec::new();
    for result in reader.deserialize::<GradeEdit>() {
        edits.push(result?);
    }
    Ok(edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{class, daily_log, skill, student};
    use crate::models::TERMS;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn state() -> SchoolState {
        let mut existing = Assessment {
            id: "a-old".to_string(),
            student_id: "s2".to_string(),
            skill_id: "k1".to_string(),
            date: Some(day(1)),
            term: TERMS[0].to_string(),
            status: AssessmentStatus::Developing,
            notes: Some("revisar".to_string()),
            participation_score: Some(6.0),
            behavior_score: Some(9.0),
            exam_score: None,
        };
        let mut unscored = existing.clone();
        unscored.id = "a-s3".to_string();
        unscored.student_id = "s3".to_string();
        unscored.participation_score = None;
        existing.exam_score = Some(5.5);

        let mut inactive = student("s9", "Zeca", "c1");
        inactive.status = crate::models::RecordStatus::Inactive;

        SchoolState {
            classes: vec![class("c1", false)],
            students: vec![
                student("s1", "Bia", "c1"),
                student("s2", "Ana", "c1"),
                student("s3", "Caio", "c1"),
                inactive,
                student("s4", "Duda", "c2"),
            ],
            skills: vec![skill("k1", "Math")],
            assessments: vec![existing, unscored],
            daily_logs: vec![
                daily_log("l1", "c1", &[("s1", true), ("s3", true)]),
                daily_log("l2", "c1", &[("s1", true), ("s3", false)]),
            ],
            ..SchoolState::default()
        }
    }

    #[test]
    fn build_prefills_existing_rows_and_attendance_suggestions() {
        let grid = GradeGrid::build(&state(), "c1", "k1", TERMS[0], day(10)).unwrap();
        let names: Vec<&str> = grid.rows.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["Ana", "Bia", "Caio"]);

        let ana = &grid.rows[0];
        assert_eq!(ana.existing_id.as_deref(), Some("a-old"));
        assert_eq!(ana.participation_score, Some(6.0));
        assert_eq!(ana.status, Some(AssessmentStatus::Developing));

        let bia = &grid.rows[1];
        assert_eq!(bia.existing_id, None);
        assert_eq!(bia.status, None);
        assert_eq!(bia.participation_score, Some(10.0));

        // Stored rows without a score are not filled from attendance.
        let caio = &grid.rows[2];
        assert_eq!(caio.existing_id.as_deref(), Some("a-s3"));
        assert_eq!(caio.participation_score, None);
        assert!(grid.rows.iter().all(|r| !r.edited));
    }

    #[test]
    fn edits_keep_prefilled_scores_unless_given() {
        let mut grid = GradeGrid::build(&state(), "c1", "k1", TERMS[0], day(10)).unwrap();
        grid.apply(&[
            GradeEdit {
                student_id: "s1".to_string(),
                status: "MET".to_string(),
                participation_score: None,
                behavior_score: Some(8.0),
                exam_score: None,
                notes: None,
            },
            GradeEdit {
                student_id: "s2".to_string(),
                status: "exceeded".to_string(),
                participation_score: Some(7.5),
                behavior_score: None,
                exam_score: None,
                notes: None,
            },
        ])
        .unwrap();

        let rows = grid.to_assessments();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|a| a.student_id != "s3"));
        let bia = rows.iter().find(|a| a.student_id == "s1").unwrap();
        assert_eq!(bia.participation_score, Some(10.0));
        assert_eq!(bia.behavior_score, Some(8.0));
        assert!(!grid.is_update("s1"));
        let ana = rows.iter().find(|a| a.student_id == "s2").unwrap();
        assert_eq!(ana.id, "a-old");
        assert_eq!(ana.status, AssessmentStatus::Exceeded);
        assert_eq!(ana.participation_score, Some(7.5));
        assert_eq!(ana.date, Some(day(10)));
        assert!(grid.is_update("s2"));
    }

    #[test]
    fn untouched_grid_writes_nothing() {
        let grid = GradeGrid::build(&state(), "c1", "k1", TERMS[0], day(10)).unwrap();
        assert!(grid.to_assessments().is_empty());
    }

    #[test]
    fn apply_rejects_unknown_students_and_statuses() {
        let mut grid = GradeGrid::build(&state(), "c1", "k1", TERMS[0], day(10)).unwrap();
        let edit = |student_id: &str, status: &str| GradeEdit {
            student_id: student_id.to_string(),
            status: status.to_string(),
            participation_score: None,
            behavior_score: None,
            exam_score: None,
            notes: None,
        };
        assert!(grid.apply(&[edit("s4", "MET")]).is_err());
        assert!(grid.apply(&[edit("s1", "GREAT")]).is_err());
    }

    #[test]
    fn build_requires_known_class_and_skill() {
        assert!(GradeGrid::build(&state(), "c9", "k1", TERMS[0], day(10)).is_err());
        assert!(GradeGrid::build(&state(), "c1", "k9", TERMS[0], day(10)).is_err());
    }
}
