use std::collections::{HashMap, HashSet};

use crate::models::{Assessment, ClassGroup, Skill, Student};

#[derive(Debug, Clone)]
pub struct RiskItem<'a> {
    pub student: &'a Student,
    pub skill: Option<&'a Skill>,
    pub assessment: &'a Assessment,
}

#[derive(Debug, Clone)]
pub struct RiskGroup<'a> {
    pub class_id: String,
    pub class: Option<&'a ClassGroup>,
    pub items: Vec<RiskItem<'a>>,
}

impl RiskGroup<'_> {
    pub fn class_name(&self) -> &str {
        self.class.map(|c| c.name.as_str()).unwrap_or(&self.class_id)
    }
}

/// Students with NOT_MET or DEVELOPING results, grouped by current class.
///
/// Students with any recorded remediation exit are left out even when a
/// later low result exists. Each (student, skill) pair appears once, at its
/// first occurrence; groups and items keep encounter order.
pub fn risk_groups<'a>(
    assessments: &'a [Assessment],
    students: &'a [Student],
    classes: &'a [ClassGroup],
    skills: &'a [Skill],
) -> Vec<RiskGroup<'a>> {
    let students_by_id: HashMap<&str, &Student> =
        students.iter().map(|s| (s.id.as_str(), s)).collect();
    let classes_by_id: HashMap<&str, &ClassGroup> =
        classes.iter().map(|c| (c.id.as_str(), c)).collect();
    let skills_by_id: HashMap<&str, &Skill> = skills.iter().map(|k| (k.id.as_str(), k)).collect();

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut group_index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<RiskGroup<'a>> = Vec::new();

    for assessment in assessments.iter().filter(|a| a.status.is_at_risk()) {
        let Some(student) = students_by_id.get(assessment.student_id.as_str()).copied() else {
            continue;
        };
        if student.remediation_exit_date.is_some() {
            continue;
        }
        if !seen.insert((student.id.as_str(), assessment.skill_id.as_str())) {
            continue;
        }

        let index = *group_index
            .entry(student.class_id.as_str())
            .or_insert_with(|| {
                groups.push(RiskGroup {
                    class_id: student.class_id.clone(),
                    class: classes_by_id.get(student.class_id.as_str()).copied(),
                    items: Vec::new(),
                });
                groups.len() - 1
            });
        groups[index].items.push(RiskItem {
            student,
            skill: skills_by_id.get(assessment.skill_id.as_str()).copied(),
            assessment,
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssessmentStatus, RecordStatus, TERMS};
    use chrono::NaiveDate;

    fn student(id: &str, class_id: &str, exit: Option<NaiveDate>) -> Student {
        Student {
            id: id.to_string(),
            name: id.to_uppercase(),
            class_id: class_id.to_string(),
            avatar_url: None,
            registration_number: None,
            birth_date: None,
            parent_name: None,
            phone: None,
            status: RecordStatus::Active,
            remediation_entry_date: exit.map(|d| d - chrono::Duration::days(10)),
            remediation_exit_date: exit,
        }
    }

    fn class(id: &str) -> ClassGroup {
        ClassGroup {
            id: id.to_string(),
            name: format!("Turma {id}"),
            grade: None,
            year: None,
            shift: None,
            teacher_ids: Vec::new(),
            is_remediation: false,
            focus_skills: Vec::new(),
            status: RecordStatus::Active,
        }
    }

    fn assessment(id: &str, student_id: &str, skill_id: &str, status: AssessmentStatus) -> Assessment {
        Assessment {
            id: id.to_string(),
            student_id: student_id.to_string(),
            skill_id: skill_id.to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1),
            term: TERMS[0].to_string(),
            status,
            notes: None,
            participation_score: None,
            behavior_score: None,
            exam_score: None,
        }
    }

    #[test]
    fn groups_by_class_in_encounter_order_and_dedups_pairs() {
        let students = vec![student("s1", "c2", None), student("s2", "c1", None)];
        let classes = vec![class("c1"), class("c2")];
        let assessments = vec![
            assessment("a1", "s1", "k1", AssessmentStatus::NotMet),
            assessment("a2", "s2", "k1", AssessmentStatus::Developing),
            assessment("a3", "s1", "k1", AssessmentStatus::Developing),
            assessment("a4", "s1", "k2", AssessmentStatus::NotMet),
            assessment("a5", "s2", "k2", AssessmentStatus::Met),
        ];

        let groups = risk_groups(&assessments, &students, &classes, &[]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].class_id, "c2");
        assert_eq!(groups[0].class_name(), "Turma c2");
        let ids: Vec<&str> = groups[0].items.iter().map(|i| i.assessment.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a4"]);
        assert_eq!(groups[1].class_id, "c1");
        assert_eq!(groups[1].items.len(), 1);
    }

    #[test]
    fn completed_episode_suppresses_student_for_every_skill() {
        let exited = NaiveDate::from_ymd_opt(2026, 2, 20);
        let students = vec![student("s1", "c1", exited), student("s2", "c1", None)];
        let assessments = vec![
            assessment("a1", "s1", "k1", AssessmentStatus::NotMet),
            assessment("a2", "s1", "k9", AssessmentStatus::NotMet),
            assessment("a3", "s2", "k1", AssessmentStatus::NotMet),
        ];

        let classes = [class("c1")];
        let groups = risk_groups(&assessments, &students, &classes, &[]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].items.iter().all(|i| i.student.id == "s2"));
    }

    #[test]
    fn unknown_students_and_classes_are_tolerated() {
        let students = vec![student("s1", "gone", None)];
        let assessments = vec![
            assessment("a1", "ghost", "k1", AssessmentStatus::NotMet),
            assessment("a2", "s1", "k1", AssessmentStatus::NotMet),
        ];
        let groups = risk_groups(&assessments, &students, &[], &[]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].class.is_none());
        assert_eq!(groups[0].class_name(), "gone");
        assert!(groups[0].items[0].skill.is_none());
    }
}
