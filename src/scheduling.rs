//! Storage-backed scheduling.
//!
//! Loads the pieces of an employee's day from Postgres, runs the pure
//! computation in `availability`, and validates bookings while the caller
//! holds the employee row lock.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::PgConnection;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api_models::AvailableSlot;
use crate::availability::{self, DaySchedule, Interval, Slot};
use crate::errors::AppError;
use crate::models::{Employee, Establishment, ScheduleBlock, Service, WorkingHours};

/// Rejects dates past the establishment's booking window.
pub fn ensure_within_window(
    establishment: &Establishment,
    date: NaiveDate,
    today: NaiveDate,
) -> Result<(), AppError> {
    let last = today + Duration::days(i64::from(establishment.booking_window_days));
    if date > last {
        return Err(AppError::BadRequest(format!(
            "Bookings are only accepted up to {} days ahead",
            establishment.booking_window_days
        )));
    }
    Ok(())
}

/// Loads one employee's schedule for `date`. `exclude` leaves out an
/// appointment being moved so it does not collide with itself.
pub async fn load_day_schedule(
    conn: &mut PgConnection,
    employee_id: Uuid,
    date: NaiveDate,
    exclude: Option<Uuid>,
) -> Result<DaySchedule, AppError> {
    let weekday = availability::weekday_index(date);

    let hours = sqlx::query_as::<_, WorkingHours>(
        "SELECT * FROM working_hours WHERE employee_id = $1 AND weekday = $2",
    )
    .bind(employee_id)
    .bind(weekday)
    .fetch_optional(&mut *conn)
    .await?;

    let working = hours.as_ref().map(WorkingHours::to_working_day).transpose()?;

    let blocks = sqlx::query_as::<_, ScheduleBlock>(
        r#"
        SELECT * FROM schedule_blocks
        WHERE employee_id = $1 AND (date = $2 OR weekday = $3)
        "#,
    )
    .bind(employee_id)
    .bind(date)
    .bind(weekday)
    .fetch_all(&mut *conn)
    .await?;

    let rules = blocks
        .iter()
        .map(ScheduleBlock::to_rule)
        .collect::<Result<Vec<_>, _>>()?;

    let busy = sqlx::query_as::<_, (NaiveTime, NaiveTime)>(
        r#"
        SELECT start_time, end_time FROM appointments
        WHERE employee_id = $1 AND date = $2 AND status <> 'canceled'
          AND ($3::uuid IS NULL OR id <> $3)
        "#,
    )
    .bind(employee_id)
    .bind(date)
    .bind(exclude)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|(s, e)| Interval::new(s, e))
    .collect::<Result<Vec<_>, _>>()?;

    Ok(DaySchedule::new(date, working)
        .with_blocks(&rules)
        .with_busy(busy))
}

/// Active employees who perform `service_id`, ordered by name.
pub async fn employees_for_service(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    service_id: Uuid,
) -> Result<Vec<Employee>, AppError> {
    let employees = sqlx::query_as::<_, Employee>(
        r#"
        SELECT e.* FROM employees e
        JOIN employee_services es ON es.employee_id = e.id
        WHERE e.establishment_id = $1 AND es.service_id = $2 AND e.active
        ORDER BY e.name, e.id
        "#,
    )
    .bind(establishment_id)
    .bind(service_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(employees)
}

pub async fn load_service(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    service_id: Uuid,
) -> Result<Service, AppError> {
    sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = $1 AND establishment_id = $2")
        .bind(service_id)
        .bind(establishment_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Service {} not found", service_id)))
}

/// Groups per-employee slots by time. Employee order follows the input order.
pub fn merge_slots(per_employee: Vec<(Uuid, Vec<Slot>)>) -> Vec<AvailableSlot> {
    let mut merged: BTreeMap<(NaiveTime, NaiveTime), Vec<Uuid>> = BTreeMap::new();
    for (employee_id, slots) in per_employee {
        for slot in slots {
            merged
                .entry((slot.start, slot.end))
                .or_default()
                .push(employee_id);
        }
    }

    merged
        .into_iter()
        .map(|((start, end), employee_ids)| AvailableSlot::from_slot(Slot { start, end }, employee_ids))
        .collect()
}

/// Free slots for a service on `date`, for one employee or for every
/// employee performing the service.
pub async fn compute_availability(
    conn: &mut PgConnection,
    establishment: &Establishment,
    service: &Service,
    date: NaiveDate,
    employee_id: Option<Uuid>,
    now: NaiveDateTime,
) -> Result<Vec<AvailableSlot>, AppError> {
    if !service.active {
        return Err(AppError::BadRequest(format!(
            "Service '{}' is not available for booking",
            service.name
        )));
    }
    ensure_within_window(establishment, date, now.date())?;

    let mut employees = employees_for_service(conn, establishment.id, service.id).await?;
    if let Some(id) = employee_id {
        employees.retain(|e| e.id == id);
        if employees.is_empty() {
            return Err(AppError::NotFound(format!(
                "Employee {} does not perform service '{}'",
                id, service.name
            )));
        }
    }

    let mut per_employee = Vec::with_capacity(employees.len());
    for employee in &employees {
        let schedule = load_day_schedule(conn, employee.id, date, None).await?;
        let slots = availability::compute_slots(
            &schedule,
            service.duration_minutes,
            establishment.slot_interval_minutes,
            now,
        )?;
        per_employee.push((employee.id, slots));
    }

    tracing::debug!(
        "Availability for service {} on {}: {} employee(s) checked",
        service.id,
        date,
        employees.len()
    );

    Ok(merge_slots(per_employee))
}

/// Locks the employee row for the rest of the transaction. Bookings for the
/// same employee serialize on this lock.
pub async fn lock_employee(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    employee_id: Uuid,
) -> Result<Employee, AppError> {
    let employee = sqlx::query_as::<_, Employee>(
        "SELECT * FROM employees WHERE id = $1 AND establishment_id = $2 FOR UPDATE",
    )
    .bind(employee_id)
    .bind(establishment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Employee {} not found", employee_id)))?;

    if !employee.active {
        return Err(AppError::BadRequest(format!(
            "Employee '{}' is not active",
            employee.name
        )));
    }

    Ok(employee)
}

pub async fn ensure_performs_service(
    conn: &mut PgConnection,
    employee: &Employee,
    service: &Service,
) -> Result<(), AppError> {
    let linked = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM employee_services WHERE employee_id = $1 AND service_id = $2",
    )
    .bind(employee.id)
    .bind(service.id)
    .fetch_one(&mut *conn)
    .await?;

    if linked.0 == 0 {
        return Err(AppError::BadRequest(format!(
            "Employee '{}' does not perform service '{}'",
            employee.name, service.name
        )));
    }
    Ok(())
}

/// How strictly a requested slot is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy {
    /// Storefront: on the slot grid, in the future, within the window.
    Storefront,
    /// Back-office: any free time, past dates allowed for record keeping.
    BackOffice,
}

/// Validates `[start, start + duration)` for an employee. Must run while the
/// employee lock is held for the result to stay true until commit.
#[allow(clippy::too_many_arguments)]
pub async fn validate_slot(
    conn: &mut PgConnection,
    establishment: &Establishment,
    employee: &Employee,
    service: &Service,
    date: NaiveDate,
    start: NaiveTime,
    now: NaiveDateTime,
    policy: SlotPolicy,
    exclude: Option<Uuid>,
) -> Result<NaiveTime, AppError> {
    let end = availability::end_of(start, service.duration_minutes).ok_or_else(|| {
        AppError::BadRequest("Appointment cannot run past midnight".to_string())
    })?;

    let schedule = load_day_schedule(conn, employee.id, date, exclude).await?;

    if schedule.working.is_none() {
        return Err(AppError::BadRequest(format!(
            "Employee '{}' does not work on {}",
            employee.name, date
        )));
    }

    if policy == SlotPolicy::Storefront {
        ensure_within_window(establishment, date, now.date())?;
        if !availability::is_in_future(date, start, now) {
            return Err(AppError::BadRequest(
                "Cannot book a time in the past".to_string(),
            ));
        }
        if !availability::is_aligned(&schedule, start, establishment.slot_interval_minutes) {
            return Err(AppError::BadRequest(format!(
                "Start time must align to {} minute slots",
                establishment.slot_interval_minutes
            )));
        }
    }

    if !availability::is_slot_free(&schedule, start, service.duration_minutes) {
        return Err(AppError::Conflict(
            "The selected time is not available".to_string(),
        ));
    }

    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn establishment(window: i32) -> Establishment {
        Establishment {
            id: Uuid::new_v4(),
            name: "Clínica".to_string(),
            slug: "clinica".to_string(),
            phone: None,
            email: None,
            address: None,
            utc_offset_minutes: 0,
            slot_interval_minutes: 30,
            booking_window_days: window,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn booking_window_is_inclusive() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let e = establishment(10);
        assert!(ensure_within_window(&e, today, today).is_ok());
        assert!(ensure_within_window(&e, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(), today).is_ok());
        assert!(ensure_within_window(&e, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(), today).is_err());
    }

    #[test]
    fn merge_groups_employees_by_slot() {
        let ana = Uuid::new_v4();
        let bia = Uuid::new_v4();
        let merged = merge_slots(vec![
            (
                ana,
                vec![
                    Slot { start: t(9, 0), end: t(9, 30) },
                    Slot { start: t(10, 0), end: t(10, 30) },
                ],
            ),
            (
                bia,
                vec![
                    Slot { start: t(9, 30), end: t(10, 0) },
                    Slot { start: t(10, 0), end: t(10, 30) },
                ],
            ),
        ]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].start, t(9, 0));
        assert_eq!(merged[0].employee_ids, vec![ana]);
        assert_eq!(merged[1].employee_ids, vec![bia]);
        assert_eq!(merged[2].employee_ids, vec![ana, bia]);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_slots(Vec::new()).is_empty());
        assert!(merge_slots(vec![(Uuid::new_v4(), Vec::new())]).is_empty());
    }
}
