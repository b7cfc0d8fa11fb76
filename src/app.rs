//! Application coordinator.
//!
//! `App` owns every collection. Commands write through the store and then
//! reload all collections wholesale, whether or not the write succeeded.

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, StoreError, StoreResult};
use crate::grid::GradeGrid;
use crate::models::{
    Assessment, AssessmentStatus, ClassDailyLog, ClassGroup, Notice, RecordStatus, Skill, Student,
    StudentPatch, User,
};
use crate::remediation::{self, Transition};
use crate::store::{Persisted, Table, TableStore};
use crate::wire;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolState {
    pub classes: Vec<ClassGroup>,
    pub students: Vec<Student>,
    pub skills: Vec<Skill>,
    pub assessments: Vec<Assessment>,
    pub daily_logs: Vec<ClassDailyLog>,
    pub notices: Vec<Notice>,
}

impl SchoolState {
    pub fn class(&self, id: &str) -> Option<&ClassGroup> {
        self.classes.iter().find(|c| c.id == id)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn skill(&self, id: &str) -> Option<&Skill> {
        self.skills.iter().find(|k| k.id == id)
    }

    pub fn skill_by_code(&self, code: &str) -> Option<&Skill> {
        self.skills.iter().find(|k| k.code.eq_ignore_ascii_case(code))
    }
}

/// What happened to the student record after an assessment was saved.
#[derive(Debug)]
pub enum RemediationOutcome {
    Unchanged,
    Applied {
        patch: StudentPatch,
        served: Persisted<()>,
    },
    /// The assessment is stored but the student record was not updated.
    Failed { patch: StudentPatch, error: StoreError },
}

impl RemediationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RemediationOutcome::Failed { .. })
    }
}

#[derive(Debug)]
pub struct AssessmentSaved {
    pub assessment_id: String,
    pub served: Persisted<()>,
    pub remediation: RemediationOutcome,
}

/// Result of a best-effort batch: every write is attempted once.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub committed: Vec<String>,
    /// (record id, error message)
    pub failed: Vec<(String, String)>,
    /// Remediation outcome per student, for committed grade rows.
    pub remediation: Vec<(String, RemediationOutcome)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssessmentDraft {
    /// Existing assessment to overwrite; a new id is generated otherwise.
    pub id: Option<String>,
    pub student_id: String,
    pub skill_id: String,
    pub term: String,
    pub status: Option<AssessmentStatus>,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub participation_score: Option<f64>,
    pub behavior_score: Option<f64>,
    pub exam_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Pending,
    Confirmed,
}

pub struct App<S> {
    store: S,
    state: SchoolState,
    today: Option<NaiveDate>,
    offline: bool,
}

impl<S: TableStore> App<S> {
    pub async fn load(store: S) -> AppResult<Self> {
        let mut app = Self {
            store,
            state: SchoolState::default(),
            today: None,
            offline: false,
        };
        app.refresh().await?;
        Ok(app)
    }

    /// Pins the date used for remediation stamps.
    #[cfg(test)]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    pub fn state(&self) -> &SchoolState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// True when the last refresh was served by the local mirror.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub async fn refresh(&mut self) -> AppResult<()> {
        let (classes, students, skills, assessments, logs, notices) = tokio::try_join!(
            self.store.get(Table::Classes),
            self.store.get(Table::Students),
            self.store.get(Table::Skills),
            self.store.get(Table::Assessments),
            self.store.get(Table::ClassDailyLogs),
            self.store.get(Table::Notices),
        )?;
        if let Err(err) = self.store.flush().await {
            warn!(event = "mirror.flush_failed", error = %err);
        }

        self.offline = ![&classes, &students, &skills, &assessments, &logs, &notices]
            .iter()
            .all(|served| served.is_remote());
        self.state = SchoolState {
            classes: wire::parse_classes(&classes.into_inner()),
            students: wire::parse_students(&students.into_inner()),
            skills: wire::parse_skills(&skills.into_inner()),
            assessments: wire::parse_assessments(&assessments.into_inner()),
            daily_logs: wire::parse_daily_logs(&logs.into_inner()),
            notices: wire::parse_notices(&notices.into_inner()),
        };
        Ok(())
    }

    /// Reloads everything, then reports the write result.
    async fn commit<T>(&mut self, result: StoreResult<T>) -> AppResult<T> {
        let refreshed = self.refresh().await;
        let value = result?;
        refreshed?;
        Ok(value)
    }

    pub async fn save_assessment(&mut self, draft: AssessmentDraft) -> AppResult<AssessmentSaved> {
        let assessment = self.validate_assessment(draft)?;
        let is_update = self.state.assessments.iter().any(|a| a.id == assessment.id);

        let record = wire::assessment_to_wire(&assessment);
        let written = if is_update {
            self.store
                .put(Table::Assessments, &assessment.id, record)
                .await
        } else {
            self.store.post(Table::Assessments, record).await
        };
        let served = match written {
            Ok(served) => served,
            Err(err) => {
                if let Err(refresh_err) = self.refresh().await {
                    warn!(event = "app.refresh_failed", error = %refresh_err);
                }
                return Err(err.into());
            }
        };
        info!(
            event = "assessment.saved",
            assessment_id = %assessment.id,
            student_id = %assessment.student_id,
            status = %assessment.status,
            served_by = served.served_by(),
        );

        // Student patch goes out before the reload so the reload sees both.
        let remediation = self
            .evaluate_remediation(&assessment.student_id, assessment.status)
            .await;
        self.refresh().await?;

        Ok(AssessmentSaved {
            assessment_id: assessment.id,
            served,
            remediation,
        })
    }

    pub async fn delete_assessment(&mut self, id: &str) -> AppResult<Persisted<()>> {
        if !self.state.assessments.iter().any(|a| a.id == id) {
            return Err(AppError::validation(format!("unknown assessment {id}")));
        }
        let result = self.store.delete(Table::Assessments, id).await;
        self.commit(result).await
    }

    /// Moves the student into a remediation class and opens an episode.
    pub async fn enroll_in_remediation(
        &mut self,
        student_id: &str,
        class_id: &str,
    ) -> AppResult<Option<Persisted<()>>> {
        let student = self.require_student(student_id)?;
        let class = self
            .state
            .class(class_id)
            .ok_or_else(|| AppError::validation(format!("unknown class {class_id}")))?;
        let Some(patch) = remediation::enroll(student, class, self.today())? else {
            return Ok(None);
        };

        let result = self.write_student_patch(student_id, &patch).await;
        self.commit(result).await.map(Some)
    }

    pub async fn finish_remediation(
        &mut self,
        student_id: &str,
        confirmation: Confirmation,
    ) -> AppResult<Option<Persisted<()>>> {
        let student = self.require_student(student_id)?;
        let Some(patch) = remediation::finish(student, self.today()) else {
            return Ok(None);
        };
        if confirmation != Confirmation::Confirmed {
            return Err(AppError::ConfirmationRequired);
        }

        let result = self.write_student_patch(student_id, &patch).await;
        self.commit(result).await.map(Some)
    }

    /// Writes every grid row concurrently, then evaluates remediation for
    /// the rows that landed. Any failed row turns the whole call into
    /// [`AppError::PartialBatch`].
    pub async fn save_grade_grid(&mut self, grid: &GradeGrid) -> AppResult<BatchReport> {
        let assessments = grid.to_assessments();
        for assessment in &assessments {
            validate_scores(assessment)?;
        }

        let store = &self.store;
        let writes = assessments.iter().map(|assessment| async move {
            let record = wire::assessment_to_wire(assessment);
            let result = if grid.is_update(&assessment.student_id) {
                store.put(Table::Assessments, &assessment.id, record).await
            } else {
                store.post(Table::Assessments, record).await
            };
            (assessment, result)
        });
        let results = join_all(writes).await;

        let mut report = BatchReport::default();
        let mut landed = Vec::new();
        for (assessment, result) in results {
            match result {
                Ok(_) => {
                    report.committed.push(assessment.id.clone());
                    landed.push(assessment);
                }
                Err(err) => {
                    warn!(
                        event = "grid.row_failed",
                        assessment_id = %assessment.id,
                        student_id = %assessment.student_id,
                        error = %err,
                    );
                    report.failed.push((assessment.id.clone(), err.to_string()));
                }
            }
        }

        for assessment in landed {
            let outcome = self
                .evaluate_remediation(&assessment.student_id, assessment.status)
                .await;
            report
                .remediation
                .push((assessment.student_id.clone(), outcome));
        }

        let refreshed = self.refresh().await;
        info!(
            event = "grid.saved",
            class_id = %grid.class_id,
            skill_id = %grid.skill_id,
            committed = report.committed.len(),
            failed = report.failed.len(),
        );
        let report = finish_batch(report)?;
        refreshed?;
        Ok(report)
    }

    /// Adds catalog skills concurrently. Codes already in the catalog are
    /// skipped.
    pub async fn import_skills(&mut self, skills: Vec<Skill>) -> AppResult<BatchReport> {
        for skill in &skills {
            if skill.code.trim().is_empty() || skill.subject.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "skill {} needs a code and a subject",
                    skill.id
                )));
            }
        }
        let fresh: Vec<&Skill> = skills
            .iter()
            .filter(|skill| {
                let known = self.state.skill_by_code(&skill.code).is_some();
                if known {
                    info!(event = "skills.import_skipped", code = %skill.code);
                }
                !known
            })
            .collect();

        let store = &self.store;
        let writes = fresh.iter().map(|skill| async move {
            let result = store.post(Table::Skills, wire::skill_to_wire(skill)).await;
            (skill.id.clone(), result)
        });
        let results = join_all(writes).await;

        let mut report = BatchReport::default();
        for (id, result) in results {
            match result {
                Ok(_) => report.committed.push(id),
                Err(err) => report.failed.push((id, err.to_string())),
            }
        }

        let refreshed = self.refresh().await;
        let report = finish_batch(report)?;
        refreshed?;
        Ok(report)
    }

    pub async fn add_class(&mut self, class: ClassGroup) -> AppResult<Persisted<()>> {
        if class.name.trim().is_empty() {
            return Err(AppError::validation("class name is required"));
        }
        let result = self.store.post(Table::Classes, wire::class_to_wire(&class)).await;
        self.commit(result).await
    }

    pub async fn add_student(&mut self, student: Student) -> AppResult<Persisted<()>> {
        if student.name.trim().is_empty() {
            return Err(AppError::validation("student name is required"));
        }
        if self.state.class(&student.class_id).is_none() {
            return Err(AppError::validation(format!("unknown class {}", student.class_id)));
        }
        if let Some(number) = &student.registration_number {
            let taken = self
                .state
                .students
                .iter()
                .any(|s| s.registration_number.as_ref() == Some(number));
            if taken {
                return Err(AppError::validation(format!(
                    "registration number {number} already in use"
                )));
            }
        }
        let result = self
            .store
            .post(Table::Students, wire::student_to_wire(&student))
            .await;
        self.commit(result).await
    }

    /// Soft delete.
    pub async fn deactivate_student(&mut self, student_id: &str) -> AppResult<Persisted<()>> {
        self.require_student(student_id)?;
        let patch = StudentPatch {
            status: Some(RecordStatus::Inactive),
            ..StudentPatch::default()
        };
        let result = self.write_student_patch(student_id, &patch).await;
        self.commit(result).await
    }

    /// Physical delete, refused while assessments reference the student.
    pub async fn delete_student(&mut self, student_id: &str) -> AppResult<Persisted<()>> {
        self.require_student(student_id)?;
        let referenced = self
            .state
            .assessments
            .iter()
            .filter(|a| a.student_id == student_id)
            .count();
        if referenced > 0 {
            return Err(AppError::validation(format!(
                "student {student_id} has {referenced} assessments; deactivate instead"
            )));
        }
        let result = self.store.delete(Table::Students, student_id).await;
        self.commit(result).await
    }

    pub async fn record_daily_log(&mut self, log: ClassDailyLog) -> AppResult<Persisted<()>> {
        if self.state.class(&log.class_id).is_none() {
            return Err(AppError::validation(format!("unknown class {}", log.class_id)));
        }
        let result = self
            .store
            .post(Table::ClassDailyLogs, wire::daily_log_to_wire(&log))
            .await;
        self.commit(result).await
    }

    pub async fn post_notice(&mut self, notice: Notice) -> AppResult<Persisted<()>> {
        if notice.title.trim().is_empty() {
            return Err(AppError::validation("notice title is required"));
        }
        let result = self
            .store
            .post(Table::Notices, wire::notice_to_wire(&notice))
            .await;
        self.commit(result).await
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<Persisted<Option<User>>> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::validation("email and password are required"));
        }
        let served = self.store.login(email, password).await?;
        Ok(served.map(|row| row.as_ref().and_then(wire::user_from_row)))
    }

    fn require_student(&self, student_id: &str) -> AppResult<&Student> {
        self.state
            .student(student_id)
            .ok_or_else(|| AppError::validation(format!("unknown student {student_id}")))
    }

    fn validate_assessment(&self, draft: AssessmentDraft) -> AppResult<Assessment> {
        self.require_student(&draft.student_id)?;
        if self.state.skill(&draft.skill_id).is_none() {
            return Err(AppError::validation(format!("unknown skill {}", draft.skill_id)));
        }
        if draft.term.trim().is_empty() {
            return Err(AppError::validation("term is required"));
        }
        let status = draft
            .status
            .ok_or_else(|| AppError::validation("status is required"))?;

        // Updates keep stored values for everything the draft leaves out.
        let stored = draft
            .id
            .as_deref()
            .and_then(|id| self.state.assessments.iter().find(|a| a.id == id));

        let assessment = Assessment {
            id: draft.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            date: Some(
                draft
                    .date
                    .or_else(|| stored.and_then(|a| a.date))
                    .unwrap_or_else(|| self.today()),
            ),
            notes: draft.notes.or_else(|| stored.and_then(|a| a.notes.clone())),
            participation_score: draft
                .participation_score
                .or_else(|| stored.and_then(|a| a.participation_score)),
            behavior_score: draft.behavior_score.or_else(|| stored.and_then(|a| a.behavior_score)),
            exam_score: draft.exam_score.or_else(|| stored.and_then(|a| a.exam_score)),
            student_id: draft.student_id,
            skill_id: draft.skill_id,
            term: draft.term,
            status,
        };
        validate_scores(&assessment)?;
        Ok(assessment)
    }

    async fn evaluate_remediation(
        &self,
        student_id: &str,
        status: AssessmentStatus,
    ) -> RemediationOutcome {
        let Some(student) = self.state.student(student_id) else {
            return RemediationOutcome::Unchanged;
        };
        let Some(patch) = remediation::evaluate(status, student, self.today()) else {
            return RemediationOutcome::Unchanged;
        };

        match self.write_student_patch(student_id, &patch).await {
            Ok(served) => RemediationOutcome::Applied { patch, served },
            Err(error) => {
                warn!(
                    event = "remediation.patch_failed",
                    student_id = %student_id,
                    error = %error,
                );
                RemediationOutcome::Failed { patch, error }
            }
        }
    }

    async fn write_student_patch(
        &self,
        student_id: &str,
        patch: &StudentPatch,
    ) -> StoreResult<Persisted<()>> {
        let value = serde_json::to_value(patch)?;
        let served = self.store.put(Table::Students, student_id, value).await?;
        if let Some(transition) = Transition::of(patch) {
            info!(
                event = transition.event_name(),
                student_id = %student_id,
                served_by = served.served_by(),
            );
        }
        Ok(served)
    }
}

fn validate_scores(assessment: &Assessment) -> AppResult<()> {
    let scores = [
        ("participation_score", assessment.participation_score),
        ("behavior_score", assessment.behavior_score),
        ("exam_score", assessment.exam_score),
    ];
    for (name, score) in scores {
        if let Some(value) = score {
            if !(0.0..=10.0).contains(&value) {
                return Err(AppError::validation(format!(
                    "{name} must be between 0 and 10, got {value}"
                )));
            }
        }
    }
    Ok(())
}

fn finish_batch(report: BatchReport) -> AppResult<BatchReport> {
    if report.is_complete() {
        Ok(report)
    } else {
        Err(AppError::PartialBatch(report))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use crate::models::{ClassDailyLog, ClassGroup, RecordStatus, Skill, Student};

    pub fn class(id: &str, is_remediation: bool) -> ClassGroup {
        ClassGroup {
            id: id.to_string(),
            name: format!("Turma {id}"),
            grade: Some("5º Ano".to_string()),
            year: Some("2026".to_string()),
            shift: Some("Manhã".to_string()),
            teacher_ids: vec!["t1".to_string()],
            is_remediation,
            focus_skills: Vec::new(),
            status: RecordStatus::Active,
        }
    }

    pub fn student(id: &str, name: &str, class_id: &str) -> Student {
        Student {
            id: id.to_string(),
            name: name.to_string(),
            class_id: class_id.to_string(),
            avatar_url: None,
            registration_number: None,
            birth_date: None,
            parent_name: None,
            phone: None,
            status: RecordStatus::Active,
            remediation_entry_date: None,
            remediation_exit_date: None,
        }
    }

    pub fn skill(id: &str, subject: &str) -> Skill {
        Skill {
            id: id.to_string(),
            code: format!("EF05{}", id.to_uppercase()),
            description: format!("Habilidade {id}"),
            subject: subject.to_string(),
            year: Some("5".to_string()),
        }
    }

    pub fn daily_log(id: &str, class_id: &str, marks: &[(&str, bool)]) -> ClassDailyLog {
        ClassDailyLog {
            id: id.to_string(),
            class_id: class_id.to_string(),
            date: None,
            content: "Aula".to_string(),
            attendance: marks
                .iter()
                .map(|(student, present)| (student.to_string(), *present))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}
