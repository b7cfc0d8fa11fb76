use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use chrono::NaiveDate;

use crate::app::SchoolState;
use crate::models::{Assessment, AssessmentStatus, Skill, Student};
use crate::risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTone {
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportCell {
    pub total: usize,
    pub success: usize,
    pub tone: CellTone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportCardRow {
    pub subject: String,
    /// One cell per requested term, `None` when nothing was assessed.
    pub cells: Vec<Option<ReportCell>>,
}

/// Outcome density of one student's assessments in a subject and term.
pub fn report_cell(
    student_id: &str,
    subject: &str,
    term: &str,
    assessments: &[Assessment],
    skills: &[Skill],
) -> Option<ReportCell> {
    let subject_skills: BTreeSet<&str> = skills
        .iter()
        .filter(|k| k.subject == subject)
        .map(|k| k.id.as_str())
        .collect();

    let (total, success) = assessments
        .iter()
        .filter(|a| {
            a.student_id == student_id
                && a.term == term
                && subject_skills.contains(a.skill_id.as_str())
        })
        .fold((0usize, 0usize), |(total, success), a| {
            (total + 1, success + usize::from(a.status.is_success()))
        });

    if total == 0 {
        return None;
    }
    let tone = if success == total {
        CellTone::Success
    } else if success == 0 {
        CellTone::Danger
    } else {
        CellTone::Warning
    };
    Some(ReportCell { total, success, tone })
}

/// Subjects come from the skill catalog, alphabetically.
pub fn report_card(
    student_id: &str,
    terms: &[&str],
    assessments: &[Assessment],
    skills: &[Skill],
) -> Vec<ReportCardRow> {
    let subjects: BTreeSet<&str> = skills.iter().map(|k| k.subject.as_str()).collect();
    subjects
        .into_iter()
        .map(|subject| ReportCardRow {
            subject: subject.to_string(),
            cells: terms
                .iter()
                .map(|term| report_cell(student_id, subject, term, assessments, skills))
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermanenceRow {
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub entry: NaiveDate,
    pub exit: Option<NaiveDate>,
    pub days: i64,
    pub open: bool,
}

/// Time spent in remediation for every student who ever entered it,
/// longest first. Open episodes are measured up to `today`.
pub fn permanence(students: &[Student], today: NaiveDate) -> Vec<PermanenceRow> {
    let mut rows: Vec<PermanenceRow> = students
        .iter()
        .filter_map(|s| {
            let entry = s.remediation_entry_date?;
            let open = s.in_remediation();
            let until = if open {
                today
            } else {
                s.remediation_exit_date.unwrap_or(today)
            };
            Some(PermanenceRow {
                student_id: s.id.clone(),
                student_name: s.name.clone(),
                class_id: s.class_id.clone(),
                entry,
                exit: if open { None } else { s.remediation_exit_date },
                days: (until - entry).num_days().max(0),
                open,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.days.cmp(&a.days).then_with(|| a.student_name.cmp(&b.student_name)));
    rows
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMix {
    pub status: AssessmentStatus,
    pub count: usize,
}

/// Counts of current results, one per (student, skill, term), optionally
/// limited to students of one class. Statuses with no results are omitted.
pub fn status_mix(assessments: &[Assessment], students: &[Student], class_id: Option<&str>) -> Vec<StatusMix> {
    let in_scope: BTreeSet<&str> = students
        .iter()
        .filter(|s| class_id.map_or(true, |c| s.class_id == c))
        .map(|s| s.id.as_str())
        .collect();

    let mut current: HashMap<(&str, &str, &str), &Assessment> = HashMap::new();
    for a in assessments.iter().filter(|a| in_scope.contains(a.student_id.as_str())) {
        let key = (a.student_id.as_str(), a.skill_id.as_str(), a.term.as_str());
        match current.get(&key) {
            Some(existing) if existing.date > a.date => {}
            _ => {
                current.insert(key, a);
            }
        }
    }

    AssessmentStatus::ALL
        .into_iter()
        .map(|status| StatusMix {
            status,
            count: current.values().filter(|a| a.status == status).count(),
        })
        .filter(|mix| mix.count > 0)
        .collect()
}

pub fn build_report(state: &SchoolState, class_id: Option<&str>, today: NaiveDate) -> String {
    let mix = status_mix(&state.assessments, &state.students, class_id);
    let groups = risk::risk_groups(&state.assessments, &state.students, &state.classes, &state.skills);
    let permanence_rows = permanence(&state.students, today);

    let mut output = String::new();
    let scope_label = class_id
        .and_then(|id| state.class(id))
        .map(|c| c.name.as_str())
        .or(class_id)
        .unwrap_or("all classes");

    let _ = writeln!(output, "# Remediation Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, today);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    if mix.is_empty() {
        let _ = writeln!(output, "No assessments recorded.");
    } else {
        for entry in mix.iter() {
            let _ = writeln!(output, "- {}: {}", entry.status, entry.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students at Risk");

    let groups: Vec<_> = groups
        .into_iter()
        .filter(|g| class_id.map_or(true, |c| g.class_id == c))
        .collect();
    if groups.is_empty() {
        let _ = writeln!(output, "No students at risk.");
    } else {
        for group in groups.iter() {
            let _ = writeln!(output, "### {}", group.class_name());
            for item in group.items.iter() {
                let skill = item
                    .skill
                    .map(|k| format!("{} ({})", k.code, k.subject))
                    .unwrap_or_else(|| item.assessment.skill_id.clone());
                let _ = writeln!(
                    output,
                    "- {}: {} {} in {}",
                    item.student.name, skill, item.assessment.status, item.assessment.term
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Remediation Permanence");

    let permanence_rows: Vec<_> = permanence_rows
        .into_iter()
        .filter(|row| class_id.map_or(true, |c| row.class_id == c))
        .collect();
    if permanence_rows.is_empty() {
        let _ = writeln!(output, "No remediation episodes recorded.");
    } else {
        for row in permanence_rows.iter() {
            let until = match row.exit {
                Some(exit) => exit.to_string(),
                None => "ongoing".to_string(),
            };
            let _ = writeln!(
                output,
                "- {}: {} days ({} to {})",
                row.student_name, row.days, row.entry, until
            );
        }
    }

    let mut notices = state.notices.clone();
    notices.sort_by(|a, b| b.date.cmp(&a.date));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Notices");

    if notices.is_empty() {
        let _ = writeln!(output, "No notices posted.");
    } else {
        for notice in notices.iter().take(5) {
            let date = notice.date.map(|d| d.to_string()).unwrap_or_default();
            let _ = writeln!(output, "- {} {}: {}", date, notice.title, notice.content);
        }
    }

    output
}
