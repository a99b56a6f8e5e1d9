//! Back-office handlers for employees, their services, weekly working hours
//! and schedule blocks.

use crate::api_models::*;
use crate::auth::AuthContext;
use crate::availability::Interval;
use crate::errors::AppError;
use crate::handlers::{employee_limit, load_establishment, AppState};
use crate::models::*;
use crate::validation;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveTime;
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

// ============ Working hours parsing ============

/// A validated working hours row, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHours {
    pub weekday: i16,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub break_time: Option<(NaiveTime, NaiveTime)>,
}

fn parse_weekday(weekday: i16) -> Result<i16, AppError> {
    if !(0..=6).contains(&weekday) {
        return Err(AppError::BadRequest(format!(
            "Invalid weekday {}: use 0 (Sunday) to 6 (Saturday)",
            weekday
        )));
    }
    Ok(weekday)
}

/// Validates a full weekly schedule. Each weekday appears at most once and
/// a break must sit strictly inside the working hours.
pub fn parse_working_hours(entries: &[WorkingHoursEntry]) -> Result<Vec<ParsedHours>, AppError> {
    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(entries.len());

    for entry in entries {
        let weekday = parse_weekday(entry.weekday)?;
        if !seen.insert(weekday) {
            return Err(AppError::BadRequest(format!(
                "Weekday {} listed more than once",
                weekday
            )));
        }

        let hours = Interval::new(
            validation::parse_time(&entry.start_time)?,
            validation::parse_time(&entry.end_time)?,
        )?;

        let break_time = match (&entry.break_start, &entry.break_end) {
            (None, None) => None,
            (Some(s), Some(e)) => {
                let brk = Interval::new(validation::parse_time(s)?, validation::parse_time(e)?)?;
                if brk.start <= hours.start || brk.end >= hours.end {
                    return Err(AppError::BadRequest(format!(
                        "Break on weekday {} must fall inside working hours",
                        weekday
                    )));
                }
                Some((brk.start, brk.end))
            }
            _ => {
                return Err(AppError::BadRequest(
                    "break_start and break_end must be given together".to_string(),
                ))
            }
        };

        parsed.push(ParsedHours {
            weekday,
            start: hours.start,
            end: hours.end,
            break_time,
        });
    }

    parsed.sort_by_key(|h| h.weekday);
    Ok(parsed)
}

// ============ Employees ============

async fn load_employee(db: &PgPool, establishment_id: Uuid, employee_id: Uuid) -> Result<Employee, AppError> {
    sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1 AND establishment_id = $2")
        .bind(employee_id)
        .bind(establishment_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_id)))
}

async fn service_ids_of(db: &PgPool, employee_id: Uuid) -> Result<Vec<Uuid>, AppError> {
    let rows = sqlx::query_as::<_, (Uuid,)>(
        "SELECT service_id FROM employee_services WHERE employee_id = $1 ORDER BY service_id",
    )
    .bind(employee_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Replaces the employee's service links. Every service must belong to the
/// establishment.
async fn replace_services(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    employee_id: Uuid,
    service_ids: &[Uuid],
) -> Result<(), AppError> {
    let unique: Vec<Uuid> = {
        let mut set = HashSet::new();
        service_ids.iter().copied().filter(|id| set.insert(*id)).collect()
    };

    let (found,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM services WHERE establishment_id = $1 AND id = ANY($2)",
    )
    .bind(establishment_id)
    .bind(&unique)
    .fetch_one(&mut *conn)
    .await?;
    if found != unique.len() as i64 {
        return Err(AppError::BadRequest(
            "One or more services do not belong to this establishment".to_string(),
        ));
    }

    sqlx::query("DELETE FROM employee_services WHERE employee_id = $1")
        .bind(employee_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO employee_services (employee_id, service_id)
        SELECT $1, UNNEST($2::uuid[])
        "#,
    )
    .bind(employee_id)
    .bind(&unique)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// GET /api/v1/establishments/:eid/employees
pub async fn list_employees(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<EmployeeListQuery>,
) -> Result<Json<Vec<EmployeeWithServices>>, AppError> {
    tracing::info!("GET /establishments/{}/employees - {:?}", eid, params);
    auth.require_establishment(eid)?;

    let employees = sqlx::query_as::<_, Employee>(
        r#"
        SELECT * FROM employees e
        WHERE e.establishment_id = $1
          AND (e.active OR $2)
          AND ($3::uuid IS NULL OR EXISTS (
              SELECT 1 FROM employee_services es
              WHERE es.employee_id = e.id AND es.service_id = $3
          ))
        ORDER BY e.name
        "#,
    )
    .bind(eid)
    .bind(params.include_inactive)
    .bind(params.service_id)
    .fetch_all(&state.db)
    .await?;

    let mut result = Vec::with_capacity(employees.len());
    for employee in employees {
        let service_ids = service_ids_of(&state.db, employee.id).await?;
        result.push(EmployeeWithServices {
            employee,
            service_ids,
        });
    }

    Ok(Json(result))
}

fn has_free_seat(active: i64, max_employees: i32) -> bool {
    active < i64::from(max_employees)
}

/// Locks the establishment row for the rest of the transaction.
///
/// Creations and reactivations take this lock before counting active
/// employees, so concurrent requests are checked against the plan limit one
/// at a time.
pub async fn lock_establishment(
    conn: &mut PgConnection,
    establishment_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("SELECT id FROM establishments WHERE id = $1 FOR UPDATE")
        .bind(establishment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Fails with `Forbidden` when no more employees may become active.
pub async fn ensure_free_seat(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    max_employees: Option<i32>,
) -> Result<(), AppError> {
    let Some(max) = max_employees else {
        return Ok(());
    };

    let (active,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM employees WHERE establishment_id = $1 AND active",
    )
    .bind(establishment_id)
    .fetch_one(&mut *conn)
    .await?;

    if !has_free_seat(active, max) {
        tracing::warn!(
            "Establishment {} reached its plan limit of {} employees",
            establishment_id,
            max
        );
        return Err(AppError::Forbidden(format!(
            "Plan allows at most {} active employees",
            max
        )));
    }
    Ok(())
}

/// POST /api/v1/establishments/:eid/employees
///
/// Enforces the `max_employees` limit of the active plan.
pub async fn create_employee(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CreateEmployeeRequest>,
) -> Result<(StatusCode, Json<EmployeeWithServices>), AppError> {
    tracing::info!("POST /establishments/{}/employees - {}", eid, req.name);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let name = validation::require_name("name", &req.name)?;
    let email = validation::normalize_email(req.email.as_deref())?;
    let phone = req
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;

    let limit = employee_limit(&state.db, establishment.id).await?;

    let mut tx = state.db.begin().await?;
    lock_establishment(&mut tx, establishment.id).await?;
    ensure_free_seat(&mut tx, establishment.id, limit).await?;

    let employee = sqlx::query_as::<_, Employee>(
        r#"
        INSERT INTO employees (id, establishment_id, name, email, phone)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(&name)
    .bind(email)
    .bind(phone)
    .fetch_one(&mut *tx)
    .await?;

    replace_services(&mut tx, establishment.id, employee.id, &req.service_ids).await?;

    tx.commit().await?;

    let service_ids = service_ids_of(&state.db, employee.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(EmployeeWithServices {
            employee,
            service_ids,
        }),
    ))
}

/// GET /api/v1/establishments/:eid/employees/:employee_id
pub async fn get_employee(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<EmployeeWithServices>, AppError> {
    tracing::info!("GET /establishments/{}/employees/{}", eid, employee_id);
    auth.require_establishment(eid)?;

    let employee = load_employee(&state.db, eid, employee_id).await?;
    let service_ids = service_ids_of(&state.db, employee.id).await?;

    Ok(Json(EmployeeWithServices {
        employee,
        service_ids,
    }))
}

/// PUT /api/v1/establishments/:eid/employees/:employee_id
pub async fn update_employee(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, employee_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateEmployeeRequest>,
) -> Result<Json<Employee>, AppError> {
    tracing::info!("PUT /establishments/{}/employees/{}", eid, employee_id);
    auth.require_establishment(eid)?;

    let name = req
        .name
        .as_deref()
        .map(|n| validation::require_name("name", n))
        .transpose()?;
    let email = validation::normalize_email(req.email.as_deref())?;
    let phone = req
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;

    let limit = employee_limit(&state.db, eid).await?;
    let mut tx = state.db.begin().await?;
    lock_establishment(&mut tx, eid).await?;

    let (currently_active,) = sqlx::query_as::<_, (bool,)>(
        "SELECT active FROM employees WHERE id = $1 AND establishment_id = $2",
    )
    .bind(employee_id)
    .bind(eid)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_id)))?;

    if req.active == Some(true) && !currently_active {
        ensure_free_seat(&mut tx, eid, limit).await?;
    }

    let employee = sqlx::query_as::<_, Employee>(
        r#"
        UPDATE employees SET
            name = COALESCE($3, name),
            email = COALESCE($4, email),
            phone = COALESCE($5, phone),
            active = COALESCE($6, active),
            updated_at = now()
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(employee_id)
    .bind(eid)
    .bind(name)
    .bind(email)
    .bind(phone)
    .bind(req.active)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(employee))
}

/// DELETE /api/v1/establishments/:eid/employees/:employee_id
///
/// Deactivates the employee. Existing appointments are kept.
pub async fn delete_employee(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Employee>, AppError> {
    tracing::info!("DELETE /establishments/{}/employees/{}", eid, employee_id);
    auth.require_establishment(eid)?;

    let employee = sqlx::query_as::<_, Employee>(
        r#"
        UPDATE employees SET active = FALSE, updated_at = now()
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(employee_id)
    .bind(eid)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_id)))?;

    Ok(Json(employee))
}

/// PUT /api/v1/establishments/:eid/employees/:employee_id/services
pub async fn set_employee_services(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, employee_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetEmployeeServicesRequest>,
) -> Result<Json<EmployeeWithServices>, AppError> {
    tracing::info!(
        "PUT /establishments/{}/employees/{}/services - {} service(s)",
        eid,
        employee_id,
        req.service_ids.len()
    );
    auth.require_establishment(eid)?;

    let employee = load_employee(&state.db, eid, employee_id).await?;

    let mut tx = state.db.begin().await?;
    replace_services(&mut tx, eid, employee.id, &req.service_ids).await?;
    tx.commit().await?;

    let service_ids = service_ids_of(&state.db, employee.id).await?;
    Ok(Json(EmployeeWithServices {
        employee,
        service_ids,
    }))
}

// ============ Working hours ============

/// GET /api/v1/establishments/:eid/employees/:employee_id/working-hours
pub async fn get_working_hours(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, employee_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<WorkingHours>>, AppError> {
    tracing::info!("GET /establishments/{}/employees/{}/working-hours", eid, employee_id);
    auth.require_establishment(eid)?;
    load_employee(&state.db, eid, employee_id).await?;

    let hours = sqlx::query_as::<_, WorkingHours>(
        "SELECT * FROM working_hours WHERE employee_id = $1 ORDER BY weekday",
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(hours))
}

/// PUT /api/v1/establishments/:eid/employees/:employee_id/working-hours
///
/// Replaces the whole week. Weekdays left out become days off. Existing
/// appointments are not touched.
pub async fn replace_working_hours(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, employee_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReplaceWorkingHoursRequest>,
) -> Result<Json<Vec<WorkingHours>>, AppError> {
    tracing::info!(
        "PUT /establishments/{}/employees/{}/working-hours - {} day(s)",
        eid,
        employee_id,
        req.days.len()
    );
    auth.require_establishment(eid)?;

    let parsed = parse_working_hours(&req.days)?;

    let mut tx = state.db.begin().await?;
    crate::scheduling::lock_employee(&mut tx, eid, employee_id).await?;

    sqlx::query("DELETE FROM working_hours WHERE employee_id = $1")
        .bind(employee_id)
        .execute(&mut *tx)
        .await?;

    let mut saved = Vec::with_capacity(parsed.len());
    for day in parsed {
        let row = sqlx::query_as::<_, WorkingHours>(
            r#"
            INSERT INTO working_hours (id, employee_id, weekday, start_time, end_time, break_start, break_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(employee_id)
        .bind(day.weekday)
        .bind(day.start)
        .bind(day.end)
        .bind(day.break_time.map(|(s, _)| s))
        .bind(day.break_time.map(|(_, e)| e))
        .fetch_one(&mut *tx)
        .await?;
        saved.push(row);
    }

    tx.commit().await?;

    Ok(Json(saved))
}

// ============ Schedule blocks ============

/// GET /api/v1/establishments/:eid/blocks
///
/// One-off blocks are filtered by the date range; recurring blocks are
/// always listed.
pub async fn list_blocks(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<BlockListQuery>,
) -> Result<Json<Vec<ScheduleBlock>>, AppError> {
    tracing::info!("GET /establishments/{}/blocks - {:?}", eid, params);
    auth.require_establishment(eid)?;

    let start = params.start_date.as_deref().map(validation::parse_date).transpose()?;
    let end = params.end_date.as_deref().map(validation::parse_date).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        validation::validate_range(s, e)?;
    }

    let blocks = sqlx::query_as::<_, ScheduleBlock>(
        r#"
        SELECT * FROM schedule_blocks
        WHERE establishment_id = $1
          AND ($2::uuid IS NULL OR employee_id = $2)
          AND (
              weekday IS NOT NULL
              OR (($3::date IS NULL OR date >= $3) AND ($4::date IS NULL OR date <= $4))
          )
        ORDER BY date NULLS FIRST, weekday, start_time
        "#,
    )
    .bind(eid)
    .bind(params.employee_id)
    .bind(start)
    .bind(end)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(blocks))
}

/// POST /api/v1/establishments/:eid/blocks
///
/// Creates a one-off block (`date`) or a weekly one (`weekday`). Existing
/// appointments inside the block are not canceled.
pub async fn create_block(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CreateBlockRequest>,
) -> Result<(StatusCode, Json<ScheduleBlock>), AppError> {
    tracing::info!("POST /establishments/{}/blocks - employee {}", eid, req.employee_id);
    auth.require_establishment(eid)?;
    load_employee(&state.db, eid, req.employee_id).await?;

    let (date, weekday) = match (&req.date, req.weekday) {
        (Some(d), None) => (Some(validation::parse_date(d)?), None),
        (None, Some(w)) => (None, Some(parse_weekday(w)?)),
        _ => {
            return Err(AppError::BadRequest(
                "Provide exactly one of date or weekday".to_string(),
            ))
        }
    };
    let interval = Interval::new(
        validation::parse_time(&req.start_time)?,
        validation::parse_time(&req.end_time)?,
    )?;

    let block = sqlx::query_as::<_, ScheduleBlock>(
        r#"
        INSERT INTO schedule_blocks (id, establishment_id, employee_id, date, weekday, start_time, end_time, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(eid)
    .bind(req.employee_id)
    .bind(date)
    .bind(weekday)
    .bind(interval.start)
    .bind(interval.end)
    .bind(req.reason.as_deref())
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(block)))
}

/// DELETE /api/v1/establishments/:eid/blocks/:block_id
pub async fn delete_block(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, block_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /establishments/{}/blocks/{}", eid, block_id);
    auth.require_establishment(eid)?;

    let deleted = sqlx::query("DELETE FROM schedule_blocks WHERE id = $1 AND establishment_id = $2")
        .bind(block_id)
        .bind(eid)
        .execute(&state.db)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!("Block {} not found", block_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(weekday: i16, start: &str, end: &str, brk: Option<(&str, &str)>) -> WorkingHoursEntry {
        WorkingHoursEntry {
            weekday,
            start_time: start.to_string(),
            end_time: end.to_string(),
            break_start: brk.map(|(s, _)| s.to_string()),
            break_end: brk.map(|(_, e)| e.to_string()),
        }
    }

    #[test]
    fn seats_run_out_at_the_plan_limit() {
        assert!(has_free_seat(0, 1));
        assert!(has_free_seat(2, 3));
        assert!(!has_free_seat(3, 3));
        assert!(!has_free_seat(4, 3));
    }

    #[test]
    fn parses_a_week_sorted_by_weekday() {
        let parsed = parse_working_hours(&[
            entry(6, "09:00", "13:00", None),
            entry(1, "09:00", "18:00", Some(("12:00", "13:00"))),
        ])
        .unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].weekday, 1);
        assert_eq!(
            parsed[0].break_time,
            Some((
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(13, 0, 0).unwrap()
            ))
        );
        assert_eq!(parsed[1].break_time, None);
    }

    #[test]
    fn rejects_duplicate_weekdays() {
        let err = parse_working_hours(&[
            entry(1, "09:00", "12:00", None),
            entry(1, "13:00", "18:00", None),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(parse_working_hours(&[entry(7, "09:00", "18:00", None)]).is_err());
        assert!(parse_working_hours(&[entry(1, "18:00", "09:00", None)]).is_err());
        assert!(parse_working_hours(&[entry(1, "09:00", "18:00", Some(("08:00", "10:00")))]).is_err());
        assert!(parse_working_hours(&[entry(1, "09:00", "18:00", Some(("13:00", "12:00")))]).is_err());
    }

    #[test]
    fn break_needs_both_ends() {
        let mut half = entry(2, "09:00", "18:00", None);
        half.break_start = Some("12:00".to_string());
        assert!(parse_working_hours(&[half]).is_err());
    }

    #[test]
    fn empty_week_is_allowed() {
        assert!(parse_working_hours(&[]).unwrap().is_empty());
    }
}
