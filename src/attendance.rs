use crate::models::{ClassDailyLog, Student};

/// Share of a class's daily logs in which the student was marked present,
/// rounded to a whole percentage. `None` when the class has no logs.
pub fn attendance_percentage(student_id: &str, class_id: &str, logs: &[ClassDailyLog]) -> Option<u8> {
    let (total, present) = logs
        .iter()
        .filter(|log| log.class_id == class_id)
        .fold((0u32, 0u32), |(total, present), log| {
            (total + 1, present + u32::from(log.was_present(student_id)))
        });
    if total == 0 {
        return None;
    }
    let pct = (100.0 * f64::from(present) / f64::from(total)).round();
    Some(pct as u8)
}

/// Participation score on the 0–10 scale with one decimal.
pub fn suggested_participation(percentage: u8) -> f64 {
    f64::from(percentage) / 10.0
}

pub fn participation_suggestion(student_id: &str, class_id: &str, logs: &[ClassDailyLog]) -> Option<f64> {
    attendance_percentage(student_id, class_id, logs).map(suggested_participation)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRow {
    pub student_id: String,
    pub student_name: String,
    pub percentage: Option<u8>,
}

/// Percentages for every student currently in the class, by name.
pub fn class_attendance(class_id: &str, students: &[Student], logs: &[ClassDailyLog]) -> Vec<AttendanceRow> {
    let mut rows: Vec<AttendanceRow> = students
        .iter()
        .filter(|s| s.class_id == class_id)
        .map(|s| AttendanceRow {
            student_id: s.id.clone(),
            student_name: s.name.clone(),
            percentage: attendance_percentage(&s.id, class_id, logs),
        })
        .collect();
    rows.sort_by(|a, b| a.student_name.cmp(&b.student_name));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn log(id: &str, class_id: &str, marks: &[(&str, bool)]) -> ClassDailyLog {
        ClassDailyLog {
            id: id.to_string(),
            class_id: class_id.to_string(),
            date: None,
            content: String::new(),
            attendance: marks
                .iter()
                .map(|(student, present)| (student.to_string(), *present))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn no_logs_means_no_percentage() {
        assert_eq!(attendance_percentage("s1", "c1", &[]), None);
        let other_class = vec![log("l1", "c2", &[("s1", true)])];
        assert_eq!(attendance_percentage("s1", "c1", &other_class), None);
        assert_eq!(participation_suggestion("s1", "c1", &other_class), None);
    }

    #[test]
    fn missing_key_counts_as_absent() {
        let logs = vec![
            log("l1", "c1", &[("s1", true)]),
            log("l2", "c1", &[("s1", false)]),
            log("l3", "c1", &[("s2", true)]),
        ];
        assert_eq!(attendance_percentage("s1", "c1", &logs), Some(33));
        assert_eq!(attendance_percentage("s2", "c1", &logs), Some(33));
        assert_eq!(attendance_percentage("s3", "c1", &logs), Some(0));
    }

    #[test]
    fn percentage_rounds_half_up_and_scales_to_ten() {
        let logs = vec![
            log("l1", "c1", &[("s1", true)]),
            log("l2", "c1", &[("s1", true)]),
            log("l3", "c1", &[("s1", true)]),
            log("l4", "c1", &[("s1", true)]),
            log("l5", "c1", &[("s1", true)]),
            log("l6", "c1", &[("s1", true)]),
            log("l7", "c1", &[("s1", true)]),
            log("l8", "c1", &[("s1", false)]),
        ];
        // 7/8 = 87.5%
        assert_eq!(attendance_percentage("s1", "c1", &logs), Some(88));
        assert_eq!(participation_suggestion("s1", "c1", &logs), Some(8.8));
    }
}
