use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Standard grading periods, in report-card column order.
pub const TERMS: [&str; 4] = ["1º Trimestre", "2º Trimestre", "3º Trimestre", "Recuperação"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentStatus {
    NotMet,
    Developing,
    Met,
    Exceeded,
}

impl AssessmentStatus {
    pub const ALL: [AssessmentStatus; 4] = [
        AssessmentStatus::NotMet,
        AssessmentStatus::Developing,
        AssessmentStatus::Met,
        AssessmentStatus::Exceeded,
    ];

    /// MET and EXCEEDED count as success everywhere.
    pub fn is_success(&self) -> bool {
        matches!(self, AssessmentStatus::Met | AssessmentStatus::Exceeded)
    }

    pub fn is_at_risk(&self) -> bool {
        !self.is_success()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentStatus::NotMet => "NOT_MET",
            AssessmentStatus::Developing => "DEVELOPING",
            AssessmentStatus::Met => "MET",
            AssessmentStatus::Exceeded => "EXCEEDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "NOT_MET" => Some(AssessmentStatus::NotMet),
            "DEVELOPING" => Some(AssessmentStatus::Developing),
            "MET" => Some(AssessmentStatus::Met),
            "EXCEEDED" => Some(AssessmentStatus::Exceeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassGroup {
    pub id: String,
    pub name: String,
    pub grade: Option<String>,
    pub year: Option<String>,
    pub shift: Option<String>,
    pub teacher_ids: Vec<String>,
    pub is_remediation: bool,
    pub focus_skills: Vec<String>,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class_id: String,
    pub avatar_url: Option<String>,
    pub registration_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub parent_name: Option<String>,
    pub phone: Option<String>,
    pub status: RecordStatus,
    pub remediation_entry_date: Option<NaiveDate>,
    pub remediation_exit_date: Option<NaiveDate>,
}

impl Student {
    /// An episode is open when an entry is recorded and no exit follows it.
    pub fn in_remediation(&self) -> bool {
        match (self.remediation_entry_date, self.remediation_exit_date) {
            (Some(_), None) => true,
            (Some(entry), Some(exit)) => exit < entry,
            (None, _) => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub id: String,
    pub code: String,
    pub description: String,
    pub subject: String,
    pub year: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub id: String,
    pub student_id: String,
    pub skill_id: String,
    pub date: Option<NaiveDate>,
    pub term: String,
    pub status: AssessmentStatus,
    pub notes: Option<String>,
    pub participation_score: Option<f64>,
    pub behavior_score: Option<f64>,
    pub exam_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDailyLog {
    pub id: String,
    pub class_id: String,
    pub date: Option<NaiveDate>,
    pub content: String,
    pub attendance: BTreeMap<String, bool>,
}

impl ClassDailyLog {
    /// Students without an entry in the attendance map count as absent.
    pub fn was_present(&self, student_id: &str) -> bool {
        self.attendance.get(student_id).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticePriority {
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date: Option<NaiveDate>,
    pub priority: NoticePriority,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Partial student update. Outer `None` leaves a field untouched, inner
/// `None` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_entry_date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_exit_date: Option<Option<NaiveDate>>,
}

/// Latest assessment for a (student, skill, term) triple. Later records win
/// date ties; undated records lose to dated ones.
pub fn latest_assessment<'a>(
    assessments: &'a [Assessment],
    student_id: &str,
    skill_id: &str,
    term: &str,
) -> Option<&'a Assessment> {
    assessments
        .iter()
        .filter(|a| a.student_id == student_id && a.skill_id == skill_id && a.term == term)
        .max_by_key(|a| a.date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(entry: Option<NaiveDate>, exit: Option<NaiveDate>) -> Student {
        Student {
            id: "s1".to_string(),
            name: "Ana Souza".to_string(),
            class_id: "c1".to_string(),
            avatar_url: None,
            registration_number: None,
            birth_date: None,
            parent_name: None,
            phone: None,
            status: RecordStatus::Active,
            remediation_entry_date: entry,
            remediation_exit_date: exit,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn exit_before_later_entry_still_counts_as_open() {
        assert!(!student(None, None).in_remediation());
        assert!(student(Some(day(2)), None).in_remediation());
        assert!(!student(Some(day(2)), Some(day(9))).in_remediation());
        assert!(student(Some(day(9)), Some(day(2))).in_remediation());
    }

    #[test]
    fn status_parse_accepts_loose_spellings() {
        assert_eq!(AssessmentStatus::parse("not met"), Some(AssessmentStatus::NotMet));
        assert_eq!(AssessmentStatus::parse("exceeded"), Some(AssessmentStatus::Exceeded));
        assert_eq!(AssessmentStatus::parse("passed"), None);
    }

    #[test]
    fn patch_serializes_cleared_fields_as_null() {
        let patch = StudentPatch {
            remediation_entry_date: Some(Some(day(4))),
            remediation_exit_date: Some(None),
            ..StudentPatch::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value["remediation_entry_date"], "2026-03-04");
        assert!(value["remediation_exit_date"].is_null());
        assert!(value.get("class_id").is_none());
    }

    #[test]
    fn latest_assessment_prefers_most_recent_date() {
        let base = Assessment {
            id: "a1".to_string(),
            student_id: "s1".to_string(),
            skill_id: "k1".to_string(),
            date: Some(day(1)),
            term: TERMS[0].to_string(),
            status: AssessmentStatus::NotMet,
            notes: None,
            participation_score: None,
            behavior_score: None,
            exam_score: None,
        };
        let newer = Assessment {
            id: "a2".to_string(),
            date: Some(day(5)),
            status: AssessmentStatus::Met,
            ..base.clone()
        };
        let undated = Assessment {
            id: "a3".to_string(),
            date: None,
            ..base.clone()
        };
        let all = vec![newer, base, undated];
        let latest = latest_assessment(&all, "s1", "k1", TERMS[0]).unwrap();
        assert_eq!(latest.id, "a2");
    }
}
