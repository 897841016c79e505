use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::SummaryError;
use crate::models::{
    CourseRealisation, CourseUnit, DateWindow, FeedbackTargetRef, Organisation, QuestionAnswer,
    ScopeType, SummaryData, SummaryDocument, TargetFeedback,
};
use crate::provider::{FeedbackSource, Registry};
use crate::store::{SummaryKey, SummaryStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed summary store and data providers.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn summary_document(row: &PgRow) -> Result<SummaryDocument, SummaryError> {
    let scope_type: String = row.try_get("scope_type")?;
    let Json(data): Json<SummaryData> = row.try_get("data")?;

    Ok(SummaryDocument {
        scope_id: row.try_get("scope_id")?,
        scope_type: scope_type.parse().map_err(SummaryError::InconsistentData)?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        data,
    })
}

fn count(row: &PgRow, column: &str) -> Result<u64, SummaryError> {
    let value: i64 = row.try_get(column)?;
    Ok(u64::try_from(value).unwrap_or_default())
}

impl SummaryStore for Database {
    async fn get(&self, key: &SummaryKey) -> Result<Option<SummaryDocument>, SummaryError> {
        let row = sqlx::query(
            r#"
            SELECT scope_id, scope_type, start_date, end_date, data
            FROM feedback_summary.summaries
            WHERE scope_id = $1 AND scope_type = $2 AND start_date = $3 AND end_date = $4
            "#,
        )
        .bind(&key.scope_id)
        .bind(key.scope_type.as_str())
        .bind(key.window.start_date)
        .bind(key.window.end_date)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(summary_document).transpose()
    }

    async fn put(&self, doc: &SummaryDocument) -> Result<(), SummaryError> {
        sqlx::query(
            r#"
            INSERT INTO feedback_summary.summaries
            (scope_id, scope_type, start_date, end_date, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (scope_id, scope_type, start_date, end_date) DO UPDATE
            SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&doc.scope_id)
        .bind(doc.scope_type.as_str())
        .bind(doc.start_date)
        .bind(doc.end_date)
        .bind(Json(&doc.data))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_many(&self, keys: &[SummaryKey]) -> Result<Vec<SummaryDocument>, SummaryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let scope_ids: Vec<&str> = keys.iter().map(|k| k.scope_id.as_str()).collect();
        let scope_types: Vec<&str> = keys.iter().map(|k| k.scope_type.as_str()).collect();
        let start_dates: Vec<NaiveDate> = keys.iter().map(|k| k.window.start_date).collect();
        let end_dates: Vec<NaiveDate> = keys.iter().map(|k| k.window.end_date).collect();

        let rows = sqlx::query(
            r#"
            SELECT s.scope_id, s.scope_type, s.start_date, s.end_date, s.data
            FROM feedback_summary.summaries s
            JOIN UNNEST($1::text[], $2::text[], $3::date[], $4::date[])
                AS k (scope_id, scope_type, start_date, end_date)
              ON s.scope_id = k.scope_id
             AND s.scope_type = k.scope_type
             AND s.start_date = k.start_date
             AND s.end_date = k.end_date
            "#,
        )
        .bind(scope_ids)
        .bind(scope_types)
        .bind(start_dates)
        .bind(end_dates)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_document).collect()
    }
}

impl Registry for Database {
    async fn organisation_ids(&self) -> Result<Vec<String>, SummaryError> {
        let rows = sqlx::query("SELECT id FROM feedback_summary.organisations ORDER BY code")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(SummaryError::from))
            .collect()
    }

    async fn organisation(&self, id: &str) -> Result<Option<Organisation>, SummaryError> {
        let Some(row) = sqlx::query("SELECT id, code, name FROM feedback_summary.organisations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let child_organisation_ids: Vec<String> = sqlx::query(
            "SELECT id FROM feedback_summary.organisations WHERE parent_id = $1 ORDER BY code",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<Result<_, _>>()?;

        let course_unit_ids: Vec<String> = sqlx::query(
            "SELECT course_unit_id FROM feedback_summary.organisation_course_units \
             WHERE organisation_id = $1 ORDER BY course_unit_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get("course_unit_id"))
        .collect::<Result<_, _>>()?;

        Ok(Some(Organisation {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            child_organisation_ids,
            course_unit_ids,
        }))
    }

    async fn course_unit(&self, id: &str) -> Result<Option<CourseUnit>, SummaryError> {
        let row = sqlx::query("SELECT id, name, course_code FROM feedback_summary.course_units WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(CourseUnit {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                course_code: row.try_get("course_code")?,
            })
        })
        .transpose()
    }

    async fn course_units_by_organisation(&self, id: &str) -> Result<Vec<CourseUnit>, SummaryError> {
        let rows = sqlx::query(
            r#"
            SELECT cu.id, cu.name, cu.course_code
            FROM feedback_summary.course_units cu
            JOIN feedback_summary.organisation_course_units ocu ON ocu.course_unit_id = cu.id
            WHERE ocu.organisation_id = $1
            ORDER BY cu.course_code
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut course_units = Vec::new();
        for row in rows {
            course_units.push(CourseUnit {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                course_code: row.try_get("course_code")?,
            });
        }

        Ok(course_units)
    }

    async fn course_realisations_by_organisation(
        &self,
        id: &str,
        window: DateWindow,
    ) -> Result<Vec<CourseRealisation>, SummaryError> {
        let rows = sqlx::query(
            r#"
            SELECT cr.id, cr.name, cr.start_date,
                   ft.id AS feedback_target_id,
                   cu.id AS course_unit_id, cu.name AS course_unit_name, cu.course_code
            FROM feedback_summary.organisation_course_realisations ocr
            JOIN feedback_summary.course_realisations cr ON cr.id = ocr.course_realisation_id
            JOIN feedback_summary.feedback_targets ft
              ON ft.course_realisation_id = cr.id AND ft.feedback_type = 'courseRealisation'
            JOIN feedback_summary.course_units cu ON cu.id = ft.course_unit_id
            WHERE ocr.organisation_id = $1
              AND cr.start_date >= $2
              AND cr.start_date <= $3
            ORDER BY cr.start_date, cr.id, ft.id
            "#,
        )
        .bind(id)
        .bind(window.start_date)
        .bind(window.end_date)
        .fetch_all(&self.pool)
        .await?;

        let mut realisations: Vec<CourseRealisation> = Vec::new();
        for row in rows {
            let realisation_id: String = row.try_get("id")?;
            let target = FeedbackTargetRef {
                id: row.try_get("feedback_target_id")?,
                course_unit: CourseUnit {
                    id: row.try_get("course_unit_id")?,
                    name: row.try_get("course_unit_name")?,
                    course_code: row.try_get("course_code")?,
                },
            };

            match realisations.last_mut() {
                Some(last) if last.id == realisation_id => last.feedback_targets.push(target),
                _ => realisations.push(CourseRealisation {
                    id: realisation_id,
                    name: row.try_get("name")?,
                    start_date: row.try_get("start_date")?,
                    feedback_targets: vec![target],
                }),
            }
        }

        Ok(realisations)
    }
}

#[derive(Deserialize)]
struct RawAnswer {
    #[serde(rename = "questionId")]
    question_id: serde_json::Value,
    #[serde(default)]
    data: serde_json::Value,
}

fn answer_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn answers(raw: Vec<RawAnswer>) -> Vec<QuestionAnswer> {
    raw.into_iter()
        .filter_map(|answer| {
            Some(QuestionAnswer {
                question_id: answer_text(&answer.question_id)?,
                value: answer_text(&answer.data)?,
            })
        })
        .collect()
}

/// Feedback target filter for a scope, with the scope id bound as `$1`.
fn scope_filter(scope_type: ScopeType) -> &'static str {
    match scope_type {
        ScopeType::CourseRealisation => "ft.course_realisation_id = $1",
        ScopeType::CourseUnit => "ft.course_unit_id = $1",
        ScopeType::Organisation => {
            "(ft.course_unit_id IN (
                SELECT ocu.course_unit_id FROM feedback_summary.organisation_course_units ocu
                WHERE ocu.organisation_id IN (SELECT id FROM scope_organisations))
             OR ft.course_realisation_id IN (
                SELECT ocr.course_realisation_id FROM feedback_summary.organisation_course_realisations ocr
                WHERE ocr.organisation_id IN (SELECT id FROM scope_organisations)))"
        }
    }
}

impl FeedbackSource for Database {
    async fn summary_question_ids(&self) -> Result<Vec<String>, SummaryError> {
        let rows = sqlx::query(
            "SELECT id FROM feedback_summary.questions \
             WHERE university_survey AND question_type = 'LIKERT' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut ids = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            ids.push(id.to_string());
        }
        Ok(ids)
    }

    async fn target_feedback(
        &self,
        scope_id: &str,
        scope_type: ScopeType,
        window: DateWindow,
    ) -> Result<Vec<TargetFeedback>, SummaryError> {
        let mut query = String::from(
            "WITH RECURSIVE scope_organisations AS ( \
               SELECT id FROM feedback_summary.organisations WHERE id = $1 \
               UNION \
               SELECT o.id FROM feedback_summary.organisations o \
               JOIN scope_organisations so ON o.parent_id = so.id \
             ) \
             SELECT ft.id, \
                    (SELECT COUNT(*) FROM feedback_summary.user_feedback_targets u \
                     WHERE u.feedback_target_id = ft.id AND u.access_status = 'STUDENT') AS student_count \
             FROM feedback_summary.feedback_targets ft \
             JOIN feedback_summary.course_realisations cr ON cr.id = ft.course_realisation_id \
             WHERE ft.feedback_type = 'courseRealisation' \
               AND cr.start_date >= $2 AND cr.start_date <= $3 AND ",
        );
        query.push_str(scope_filter(scope_type));
        query.push_str(" ORDER BY ft.id");

        let rows = sqlx::query(&query)
            .bind(scope_id)
            .bind(window.start_date)
            .bind(window.end_date)
            .fetch_all(&self.pool)
            .await?;

        let mut targets = Vec::new();
        for row in &rows {
            targets.push(TargetFeedback {
                feedback_target_id: row.try_get("id")?,
                student_count: count(row, "student_count")?,
                feedbacks: Vec::new(),
            });
        }
        if targets.is_empty() {
            return Ok(targets);
        }

        let target_ids: Vec<i64> = targets.iter().map(|t| t.feedback_target_id).collect();
        let feedback_rows = sqlx::query(
            r#"
            SELECT f.feedback_target_id, f.data
            FROM feedback_summary.feedbacks f
            JOIN feedback_summary.user_feedback_targets u
              ON u.feedback_target_id = f.feedback_target_id
             AND u.user_id = f.user_id
             AND u.access_status = 'STUDENT'
            WHERE f.feedback_target_id = ANY($1)
            "#,
        )
        .bind(&target_ids)
        .fetch_all(&self.pool)
        .await?;

        let index: HashMap<i64, usize> = target_ids
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();
        for row in feedback_rows {
            let target_id: i64 = row.try_get("feedback_target_id")?;
            let Json(raw): Json<Vec<RawAnswer>> = row.try_get("data")?;
            if let Some(&position) = index.get(&target_id) {
                targets[position].feedbacks.push(answers(raw));
            }
        }

        Ok(targets)
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let organisations = vec![
        ("hy-org-matlu", "H50", "Faculty of Science", None),
        ("hy-org-tkt", "500-K005", "Computer Science", Some("hy-org-matlu")),
        ("hy-org-mat", "500-M001", "Mathematics", Some("hy-org-matlu")),
    ];

    for (id, code, name, parent_id) in organisations {
        sqlx::query(
            r#"
            INSERT INTO feedback_summary.organisations (id, code, name, parent_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET code = EXCLUDED.code, name = EXCLUDED.name, parent_id = EXCLUDED.parent_id
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(name)
        .bind(parent_id)
        .execute(pool)
        .await?;
    }

    let course_units = vec![
        ("hy-cu-tkt10001", "TKT10001", "Introduction to Programming", "hy-org-tkt"),
        ("hy-cu-tkt20006", "TKT20006", "Software Engineering", "hy-org-tkt"),
        ("hy-cu-mat11001", "MAT11001", "Linear Algebra I", "hy-org-mat"),
    ];

    for (id, course_code, name, organisation_id) in course_units {
        sqlx::query(
            r#"
            INSERT INTO feedback_summary.course_units (id, course_code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET course_code = EXCLUDED.course_code, name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(course_code)
        .bind(name)
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO feedback_summary.organisation_course_units (organisation_id, course_unit_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(organisation_id)
        .bind(id)
        .execute(pool)
        .await?;
    }

    // the last realisation belongs to a mathematics course but is also run by
    // computer science, which makes it a partial course unit there
    let year = chrono::Utc::now().date_naive().format("%Y").to_string();
    let realisations = vec![
        (1_i64, "hy-cur-1", "Introduction to Programming, spring", "01-16", "hy-cu-tkt10001", "hy-org-tkt"),
        (2_i64, "hy-cur-2", "Software Engineering, autumn", "09-04", "hy-cu-tkt20006", "hy-org-tkt"),
        (3_i64, "hy-cur-3", "Linear Algebra I for CS", "01-16", "hy-cu-mat11001", "hy-org-tkt"),
    ];

    for (target_id, id, name, month_day, course_unit_id, organisation_id) in realisations {
        let start_date = NaiveDate::parse_from_str(&format!("{year}-{month_day}"), "%Y-%m-%d")?;
        let end_date = start_date + chrono::Duration::days(60);

        sqlx::query(
            r#"
            INSERT INTO feedback_summary.course_realisations (id, name, start_date, end_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, start_date = EXCLUDED.start_date, end_date = EXCLUDED.end_date
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(start_date)
        .bind(end_date)
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT INTO feedback_summary.organisation_course_realisations \
             (organisation_id, course_realisation_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(organisation_id)
        .bind(id)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO feedback_summary.feedback_targets
            (id, feedback_type, course_unit_id, course_realisation_id)
            VALUES ($1, 'courseRealisation', $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(target_id)
        .bind(course_unit_id)
        .bind(id)
        .execute(pool)
        .await?;

        for student in 0..12 {
            let user_id = format!("student-{target_id}-{student}");
            sqlx::query(
                "INSERT INTO feedback_summary.user_feedback_targets \
                 (feedback_target_id, user_id, access_status) VALUES ($1, $2, 'STUDENT') \
                 ON CONFLICT DO NOTHING",
            )
            .bind(target_id)
            .bind(&user_id)
            .execute(pool)
            .await?;

            if student % 3 == 2 {
                continue;
            }

            let answers = serde_json::json!([
                { "questionId": 1, "data": ((student + target_id) % 5 + 1).to_string() },
                { "questionId": 2, "data": if student == 0 { "0".to_string() } else { (student % 5 + 1).to_string() } },
                { "questionId": 3, "data": "Good course" },
            ]);
            sqlx::query(
                "INSERT INTO feedback_summary.feedbacks (feedback_target_id, user_id, data) \
                 VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(target_id)
            .bind(&user_id)
            .bind(Json(answers))
            .execute(pool)
            .await?;
        }
    }

    for (id, question_type) in [(1_i64, "LIKERT"), (2, "LIKERT"), (3, "OPEN")] {
        sqlx::query(
            "INSERT INTO feedback_summary.questions (id, question_type, university_survey) \
             VALUES ($1, $2, true) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(question_type)
        .execute(pool)
        .await?;
    }

    Ok(())
}
