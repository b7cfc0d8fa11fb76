use chrono::NaiveDate;

use crate::models::{Assessment, AssessmentStatus, Student};

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineKind {
    Assessment {
        assessment_id: String,
        skill_id: String,
        term: String,
        status: AssessmentStatus,
    },
    RemediationEntry,
    RemediationExit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub date: Option<NaiveDate>,
    pub kind: TimelineKind,
}

impl TimelineEvent {
    /// Undated events sort as the Unix epoch.
    pub fn sort_key(&self) -> NaiveDate {
        self.date.unwrap_or(NaiveDate::default())
    }
}

/// Every assessment of the student plus the remediation entry and exit,
/// newest first.
pub fn build_timeline(student: &Student, assessments: &[Assessment]) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = assessments
        .iter()
        .filter(|a| a.student_id == student.id)
        .map(|a| TimelineEvent {
            date: a.date,
            kind: TimelineKind::Assessment {
                assessment_id: a.id.clone(),
                skill_id: a.skill_id.clone(),
                term: a.term.clone(),
                status: a.status,
            },
        })
        .collect();

    if let Some(entry) = student.remediation_entry_date {
        events.push(TimelineEvent {
            date: Some(entry),
            kind: TimelineKind::RemediationEntry,
        });
    }
    if let Some(exit) = student.remediation_exit_date {
        events.push(TimelineEvent {
            date: Some(exit),
            kind: TimelineKind::RemediationExit,
        });
    }

    events.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordStatus, TERMS};

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn assessment(id: &str, date: Option<NaiveDate>) -> Assessment {
        Assessment {
            id: id.to_string(),
            student_id: "s1".to_string(),
            skill_id: "k1".to_string(),
            date,
            term: TERMS[0].to_string(),
            status: AssessmentStatus::NotMet,
            notes: None,
            participation_score: None,
            behavior_score: None,
            exam_score: None,
        }
    }

    #[test]
    fn merges_events_newest_first_with_undated_last() {
        let student = Student {
            id: "s1".to_string(),
            name: "Carla".to_string(),
            class_id: "c1".to_string(),
            avatar_url: None,
            registration_number: None,
            birth_date: None,
            parent_name: None,
            phone: None,
            status: RecordStatus::Active,
            remediation_entry_date: Some(day(3, 2)),
            remediation_exit_date: Some(day(4, 15)),
        };
        let mut other = assessment("x", Some(day(5, 1)));
        other.student_id = "s2".to_string();
        let assessments = vec![
            assessment("a1", Some(day(3, 1))),
            assessment("a2", None),
            assessment("a3", Some(day(4, 10))),
            assessment("a4", Some(day(3, 1))),
            other,
        ];

        let timeline = build_timeline(&student, &assessments);
        assert_eq!(timeline.len(), 6);
        assert_eq!(timeline[0].kind, TimelineKind::RemediationExit);
        assert_eq!(timeline[1].date, Some(day(4, 10)));
        assert_eq!(timeline[2].kind, TimelineKind::RemediationEntry);
        // duplicates are kept, undated goes last
        assert_eq!(timeline[3].date, Some(day(3, 1)));
        assert_eq!(timeline[4].date, Some(day(3, 1)));
        assert_eq!(timeline[5].date, None);
    }
}
