//! Remediation ("reforço") transitions.
//!
//! A student enters remediation on a NOT_MET or DEVELOPING result and exits
//! on MET or EXCEEDED. Every function here is pure: it returns the patch to
//! write, or `None` when the student is already in the implied state.

use chrono::NaiveDate;

use crate::error::{AppError, AppResult};
use crate::models::{AssessmentStatus, ClassGroup, Student, StudentPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    pub fn of(patch: &StudentPatch) -> Option<Self> {
        match (patch.remediation_entry_date, patch.remediation_exit_date) {
            (Some(Some(_)), _) => Some(Transition::Enter),
            (None, Some(Some(_))) => Some(Transition::Exit),
            _ => None,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Transition::Enter => "remediation.entered",
            Transition::Exit => "remediation.exited",
        }
    }
}

/// Patch implied by a freshly saved assessment.
pub fn evaluate(status: AssessmentStatus, student: &Student, today: NaiveDate) -> Option<StudentPatch> {
    let open = student.in_remediation();
    if status.is_success() && open {
        Some(exit_patch(today))
    } else if status.is_at_risk() && !open {
        Some(StudentPatch {
            remediation_entry_date: Some(Some(today)),
            remediation_exit_date: Some(None),
            ..StudentPatch::default()
        })
    } else {
        None
    }
}

/// Manual "finish remediation". Nothing to do without an open episode.
pub fn finish(student: &Student, today: NaiveDate) -> Option<StudentPatch> {
    student.in_remediation().then(|| exit_patch(today))
}

/// Manual enrollment: moves the student into a remediation class and opens
/// an episode in the same patch. An already open episode keeps its entry
/// date.
pub fn enroll(student: &Student, class: &ClassGroup, today: NaiveDate) -> AppResult<Option<StudentPatch>> {
    if !class.is_remediation {
        return Err(AppError::validation(format!(
            "class {} is not a remediation class",
            class.name
        )));
    }

    let moves = student.class_id != class.id;
    let opens = !student.in_remediation();
    if !moves && !opens {
        return Ok(None);
    }

    let mut patch = StudentPatch {
        class_id: Some(class.id.clone()),
        ..StudentPatch::default()
    };
    if opens {
        patch.remediation_entry_date = Some(Some(today));
        patch.remediation_exit_date = Some(None);
    }
    Ok(Some(patch))
}

fn exit_patch(today: NaiveDate) -> StudentPatch {
    StudentPatch {
        remediation_exit_date: Some(Some(today)),
        ..StudentPatch::default()
    }
}
