use std::collections::HashSet;

use anyhow::Context;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::models::{ClassGroup, Notice, NoticePriority, RecordStatus, Skill, Student};
use crate::store::{hash_password, Table, TableStore};
use crate::wire;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn class(id: &str, name: &str, grade: &str, shift: &str, is_remediation: bool, focus: &[&str]) -> ClassGroup {
    ClassGroup {
        id: id.to_string(),
        name: name.to_string(),
        grade: Some(grade.to_string()),
        year: Some("2026".to_string()),
        shift: Some(shift.to_string()),
        teacher_ids: vec!["u-prof-helena".to_string()],
        is_remediation,
        focus_skills: focus.iter().map(|s| s.to_string()).collect(),
        status: RecordStatus::Active,
    }
}

fn student(id: &str, name: &str, class_id: &str, registration: &str, birth: (i32, u32, u32)) -> anyhow::Result<Student> {
    Ok(Student {
        id: id.to_string(),
        name: name.to_string(),
        class_id: class_id.to_string(),
        avatar_url: None,
        registration_number: Some(registration.to_string()),
        birth_date: Some(
            NaiveDate::from_ymd_opt(birth.0, birth.1, birth.2).context("invalid date")?,
        ),
        parent_name: None,
        phone: None,
        status: RecordStatus::Active,
        remediation_entry_date: None,
        remediation_exit_date: None,
    })
}

fn skill(id: &str, code: &str, subject: &str, description: &str) -> Skill {
    Skill {
        id: id.to_string(),
        code: code.to_string(),
        description: description.to_string(),
        subject: subject.to_string(),
        year: Some("5".to_string()),
    }
}

fn seed_rows() -> anyhow::Result<Vec<(Table, Value)>> {
    let classes = vec![
        class("c-5a", "5º Ano A", "5º Ano", "Manhã", false, &["k-ma03"]),
        class("c-5b", "5º Ano B", "5º Ano", "Tarde", false, &[]),
        class("c-ref", "Reforço 5º Ano", "5º Ano", "Tarde", true, &["k-ma03", "k-lp01"]),
    ];
    let students = vec![
        student("s-ana", "Ana Beatriz Souza", "c-5a", "2026-0001", (2015, 4, 12))?,
        student("s-bruno", "Bruno Henrique Lima", "c-5a", "2026-0002", (2015, 9, 3))?,
        student("s-carla", "Carla Mendes", "c-5b", "2026-0003", (2015, 1, 27))?,
        student("s-davi", "Davi Oliveira", "c-5b", "2026-0004", (2014, 11, 8))?,
    ];
    let skills = vec![
        skill("k-ma01", "EF05MA01", "Matemática", "Ler, escrever e ordenar números naturais até a ordem das centenas de milhar"),
        skill("k-ma03", "EF05MA03", "Matemática", "Identificar e representar frações"),
        skill("k-lp01", "EF05LP01", "Língua Portuguesa", "Grafar palavras utilizando regras de correspondência fonema-grafema"),
        skill("k-ci01", "EF05CI01", "Ciências", "Explorar fenômenos da vida cotidiana que evidenciem propriedades físicas dos materiais"),
    ];
    let notice = Notice {
        id: "n-welcome".to_string(),
        title: "Início do 1º Trimestre".to_string(),
        content: "Avaliações diagnósticas na primeira semana.".to_string(),
        date: NaiveDate::from_ymd_opt(2026, 2, 2),
        priority: NoticePriority::High,
        author: Some("Coordenação".to_string()),
    };

    let mut rows = Vec::new();
    rows.extend(classes.iter().map(|c| (Table::Classes, wire::class_to_wire(c))));
    rows.extend(students.iter().map(|s| (Table::Students, wire::student_to_wire(s))));
    rows.extend(skills.iter().map(|k| (Table::Skills, wire::skill_to_wire(k))));
    rows.push((Table::Notices, wire::notice_to_wire(&notice)));
    rows.push((
        Table::Users,
        json!({
            "id": "u-coord",
            "name": "Coordenação Pedagógica",
            "email": "coordenacao@escola.example",
            "password_hash": hash_password("reforco2026"),
            "role": "admin",
        }),
    ));
    rows.push((
        Table::Users,
        json!({
            "id": "u-prof-helena",
            "name": "Helena Castro",
            "email": "helena.castro@escola.example",
            "password_hash": hash_password("reforco2026"),
            "role": "teacher",
        }),
    ));
    Ok(rows)
}

/// Inserts the sample school. Records whose id already exists are left alone.
pub async fn seed<S: TableStore>(store: &S) -> anyhow::Result<usize> {
    let mut inserted = 0usize;
    let mut known: std::collections::HashMap<Table, HashSet<String>> = Default::default();

    for (table, row) in seed_rows()? {
        if !known.contains_key(&table) {
            let ids = store
                .get(table)
                .await
                .with_context(|| format!("failed to read {table}"))?
                .into_inner()
                .iter()
                .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
                .collect();
            known.insert(table, ids);
        }
        let id = row.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        if known.get(&table).is_some_and(|ids| ids.contains(&id)) {
            continue;
        }

        store
            .post(table, row)
            .await
            .with_context(|| format!("failed to seed {table} {id}"))?;
        inserted += 1;
    }

    Ok(inserted)
}

pub fn read_skills_csv(csv_path: &std::path::Path) -> anyhow::Result<Vec<Skill>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        code: String,
        description: String,
        subject: String,
        year: Option<String>,
        id: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut skills = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let id = row
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("k-{}", row.code.to_lowercase()));
        skills.push(Skill {
            id,
            code: row.code,
            description: row.description,
            subject: row.subject,
            year: row.year.filter(|y| !y.trim().is_empty()),
        });
    }

    Ok(skills)
}
