//! Conversion between snake_case wire rows and typed domain records.
//!
//! Parsing is lenient: malformed JSON sub-fields become empty collections,
//! unparseable dates become `None`, and rows missing an identity are
//! skipped with a warning instead of failing the whole table.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::models::{
    Assessment, AssessmentStatus, ClassDailyLog, ClassGroup, Notice, NoticePriority,
    RecordStatus, Skill, Student, User,
};
use crate::store::Table;

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.date_naive());
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.get(key).and_then(Value::as_str).and_then(parse_date)
}

fn number(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(row: &Value, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

/// Decodes a field that may hold a JSON value directly or JSON-encoded text.
fn embedded_json(row: &Value, key: &str) -> Option<Value> {
    match row.get(key)? {
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

fn id_list(row: &Value, key: &str) -> Vec<String> {
    match embedded_json(row, key) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn attendance_map(row: &Value) -> BTreeMap<String, bool> {
    match embedded_json(row, "attendance") {
        Some(Value::Object(entries)) => entries
            .into_iter()
            .map(|(student_id, present)| {
                let present = match present {
                    Value::Bool(b) => b,
                    Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
                    _ => false,
                };
                (student_id, present)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn record_status(row: &Value) -> RecordStatus {
    match row.get("status").and_then(Value::as_str) {
        Some("inactive") => RecordStatus::Inactive,
        _ => RecordStatus::Active,
    }
}

fn parse_rows<T>(table: Table, rows: &[Value], parse: fn(&Value) -> Option<T>) -> Vec<T> {
    rows.iter()
        .filter_map(|row| {
            let parsed = parse(row);
            if parsed.is_none() {
                warn!(event = "wire.row_skipped", table = table.name(), row = %row);
            }
            parsed
        })
        .collect()
}

pub fn class_from_row(row: &Value) -> Option<ClassGroup> {
    let mut teacher_ids = id_list(row, "teacher_ids");
    if teacher_ids.is_empty() {
        teacher_ids.extend(text(row, "teacher_id"));
    }
    Some(ClassGroup {
        id: text(row, "id")?,
        name: text(row, "name").unwrap_or_default(),
        grade: text(row, "grade"),
        year: text(row, "year"),
        shift: text(row, "shift"),
        teacher_ids,
        is_remediation: flag(row, "is_remediation"),
        focus_skills: id_list(row, "focus_skills"),
        status: record_status(row),
    })
}

pub fn student_from_row(row: &Value) -> Option<Student> {
    Some(Student {
        id: text(row, "id")?,
        name: text(row, "name").unwrap_or_default(),
        class_id: text(row, "class_id").unwrap_or_default(),
        avatar_url: text(row, "avatar_url"),
        registration_number: text(row, "registration_number"),
        birth_date: date(row, "birth_date"),
        parent_name: text(row, "parent_name"),
        phone: text(row, "phone"),
        status: record_status(row),
        remediation_entry_date: date(row, "remediation_entry_date"),
        remediation_exit_date: date(row, "remediation_exit_date"),
    })
}

pub fn skill_from_row(row: &Value) -> Option<Skill> {
    Some(Skill {
        id: text(row, "id")?,
        code: text(row, "code").unwrap_or_default(),
        description: text(row, "description").unwrap_or_default(),
        subject: text(row, "subject").unwrap_or_default(),
        year: text(row, "year"),
    })
}

pub fn assessment_from_row(row: &Value) -> Option<Assessment> {
    let status = row
        .get("status")
        .and_then(Value::as_str)
        .and_then(AssessmentStatus::parse)?;
    Some(Assessment {
        id: text(row, "id")?,
        student_id: text(row, "student_id")?,
        skill_id: text(row, "skill_id")?,
        date: date(row, "date"),
        term: text(row, "term").unwrap_or_default(),
        status,
        notes: text(row, "notes"),
        participation_score: number(row, "participation_score"),
        behavior_score: number(row, "behavior_score"),
        exam_score: number(row, "exam_score"),
    })
}

pub fn daily_log_from_row(row: &Value) -> Option<ClassDailyLog> {
    Some(ClassDailyLog {
        id: text(row, "id")?,
        class_id: text(row, "class_id")?,
        date: date(row, "date"),
        content: text(row, "content").unwrap_or_default(),
        attendance: attendance_map(row),
    })
}

pub fn notice_from_row(row: &Value) -> Option<Notice> {
    let priority = match row.get("priority").and_then(Value::as_str) {
        Some("high") => NoticePriority::High,
        _ => NoticePriority::Normal,
    };
    Some(Notice {
        id: text(row, "id")?,
        title: text(row, "title").unwrap_or_default(),
        content: text(row, "content").unwrap_or_default(),
        date: date(row, "date"),
        priority,
        author: text(row, "author"),
    })
}

pub fn user_from_row(row: &Value) -> Option<User> {
    Some(User {
        id: text(row, "id")?,
        name: text(row, "name").unwrap_or_default(),
        email: text(row, "email")?,
        role: text(row, "role").unwrap_or_else(|| "teacher".to_string()),
    })
}

pub fn parse_classes(rows: &[Value]) -> Vec<ClassGroup> {
    parse_rows(Table::Classes, rows, class_from_row)
}

pub fn parse_students(rows: &[Value]) -> Vec<Student> {
    parse_rows(Table::Students, rows, student_from_row)
}

pub fn parse_skills(rows: &[Value]) -> Vec<Skill> {
    parse_rows(Table::Skills, rows, skill_from_row)
}

pub fn parse_assessments(rows: &[Value]) -> Vec<Assessment> {
    parse_rows(Table::Assessments, rows, assessment_from_row)
}

pub fn parse_daily_logs(rows: &[Value]) -> Vec<ClassDailyLog> {
    parse_rows(Table::ClassDailyLogs, rows, daily_log_from_row)
}

pub fn parse_notices(rows: &[Value]) -> Vec<Notice> {
    parse_rows(Table::Notices, rows, notice_from_row)
}

fn opt_date(value: Option<NaiveDate>) -> Value {
    value.map(format_date).map(Value::String).unwrap_or(Value::Null)
}

pub fn class_to_wire(class: &ClassGroup) -> Value {
    json!({
        "id": class.id,
        "name": class.name,
        "grade": class.grade,
        "year": class.year,
        "shift": class.shift,
        "teacher_ids": Value::Array(class.teacher_ids.iter().cloned().map(Value::String).collect()).to_string(),
        "is_remediation": i32::from(class.is_remediation),
        "focus_skills": Value::Array(class.focus_skills.iter().cloned().map(Value::String).collect()).to_string(),
        "status": class.status.as_str(),
    })
}

pub fn student_to_wire(student: &Student) -> Value {
    json!({
        "id": student.id,
        "name": student.name,
        "class_id": student.class_id,
        "avatar_url": student.avatar_url,
        "registration_number": student.registration_number,
        "birth_date": opt_date(student.birth_date),
        "parent_name": student.parent_name,
        "phone": student.phone,
        "status": student.status.as_str(),
        "remediation_entry_date": opt_date(student.remediation_entry_date),
        "remediation_exit_date": opt_date(student.remediation_exit_date),
    })
}

pub fn skill_to_wire(skill: &Skill) -> Value {
    json!({
        "id": skill.id,
        "code": skill.code,
        "description": skill.description,
        "subject": skill.subject,
        "year": skill.year,
    })
}

pub fn assessment_to_wire(assessment: &Assessment) -> Value {
    json!({
        "id": assessment.id,
        "student_id": assessment.student_id,
        "skill_id": assessment.skill_id,
        "date": opt_date(assessment.date),
        "status": assessment.status.as_str(),
        "term": assessment.term,
        "notes": assessment.notes,
        "participation_score": assessment.participation_score,
        "behavior_score": assessment.behavior_score,
        "exam_score": assessment.exam_score,
    })
}

pub fn daily_log_to_wire(log: &ClassDailyLog) -> Value {
    let attendance: Map<String, Value> = log
        .attendance
        .iter()
        .map(|(student_id, present)| (student_id.clone(), Value::Bool(*present)))
        .collect();
    json!({
        "id": log.id,
        "class_id": log.class_id,
        "date": opt_date(log.date),
        "content": log.content,
        "attendance": Value::Object(attendance).to_string(),
    })
}

pub fn notice_to_wire(notice: &Notice) -> Value {
    json!({
        "id": notice.id,
        "title": notice.title,
        "content": notice.content,
        "date": opt_date(notice.date),
        "priority": match notice.priority {
            NoticePriority::Normal => "normal",
            NoticePriority::High => "high",
        },
        "author": notice.author,
    })
}
