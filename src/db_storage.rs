use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::api_models::{CheckinRequest, CheckinResponse};
use crate::errors::{AppError, ResultExt};
use crate::lifecycle::{self, CancelActor, LoyaltyContext, PackageContext};
use crate::models::{
    Appointment, CustomerServicePackage, Establishment, LoyaltyProgram, Service,
};
use crate::scheduling::{self, SlotPolicy};

/// A booking request after input parsing.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub customer_id: Uuid,
    pub employee_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    /// Price override; the service price applies when `None`.
    pub price_cents: Option<i64>,
    pub customer_service_package_id: Option<Uuid>,
    pub notes: Option<String>,
    pub policy: SlotPolicy,
}

/// Transactional appointment operations.
///
/// Every write that depends on the employee's schedule takes the employee row
/// lock first, so two bookings racing for overlapping times cannot both pass
/// validation.
pub struct AppointmentStorage {
    pool: PgPool,
}

impl AppointmentStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a scheduled appointment after re-validating the slot under the
    /// employee lock. A package id reserves one session of that package.
    pub async fn book(
        &self,
        establishment: &Establishment,
        booking: NewBooking,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppError> {
        let mut tx = self.pool.begin().await?;

        let service =
            scheduling::load_service(&mut tx, establishment.id, booking.service_id).await?;
        if !service.active {
            return Err(AppError::BadRequest(format!(
                "Service '{}' is not available for booking",
                service.name
            )));
        }

        let customer_exists = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM customers WHERE id = $1 AND establishment_id = $2",
        )
        .bind(booking.customer_id)
        .bind(establishment.id)
        .fetch_one(&mut *tx)
        .await?;
        if customer_exists.0 == 0 {
            return Err(AppError::NotFound(format!(
                "Customer {} not found",
                booking.customer_id
            )));
        }

        let employee =
            scheduling::lock_employee(&mut tx, establishment.id, booking.employee_id).await?;
        scheduling::ensure_performs_service(&mut tx, &employee, &service).await?;

        let end = scheduling::validate_slot(
            &mut tx,
            establishment,
            &employee,
            &service,
            booking.date,
            booking.start,
            now,
            booking.policy,
            None,
        )
        .await?;

        if let Some(package_id) = booking.customer_service_package_id {
            let context = package_context(
                &mut tx,
                establishment.id,
                booking.customer_id,
                package_id,
                service.id,
                booking.date,
            )
            .await?;
            if context.remaining <= 0 {
                return Err(AppError::BadRequest(
                    "Package has no remaining sessions for this service".to_string(),
                ));
            }
        }

        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointments (
                id, establishment_id, customer_id, employee_id, service_id,
                customer_service_package_id, date, start_time, end_time,
                status, price_cents, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'scheduled', $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(establishment.id)
        .bind(booking.customer_id)
        .bind(employee.id)
        .bind(service.id)
        .bind(booking.customer_service_package_id)
        .bind(booking.date)
        .bind(booking.start)
        .bind(end)
        .bind(booking.price_cents.unwrap_or(service.price.cents()))
        .bind(booking.notes.as_deref())
        .fetch_one(&mut *tx)
        .await
        .context("inserting appointment")?;

        if let Some(package_id) = booking.customer_service_package_id {
            record_package_usage(&mut tx, package_id, service.id, appointment.id).await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Booked appointment {} for employee {} on {} at {}",
            appointment.id,
            employee.id,
            appointment.date,
            appointment.start_time.format("%H:%M")
        );

        Ok(appointment)
    }

    /// Books with the first candidate employee whose slot is still free.
    /// Candidates are tried in order; a conflict moves on to the next one.
    pub async fn book_first_available(
        &self,
        establishment: &Establishment,
        candidates: &[Uuid],
        booking: NewBooking,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppError> {
        for employee_id in candidates {
            let attempt = NewBooking {
                employee_id: *employee_id,
                ..booking.clone()
            };
            match self.book(establishment, attempt, now).await {
                Err(AppError::Conflict(_)) => {
                    tracing::debug!(
                        "Employee {} taken at {} {}, trying next",
                        employee_id,
                        booking.date,
                        booking.start.format("%H:%M")
                    );
                }
                result => return result,
            }
        }

        Err(AppError::Conflict(
            "The selected time is not available".to_string(),
        ))
    }

    /// Moves a scheduled appointment to a new date, time, or employee.
    pub async fn reschedule(
        &self,
        establishment: &Establishment,
        appointment_id: Uuid,
        employee_id: Option<Uuid>,
        date: NaiveDate,
        start: NaiveTime,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = lock_appointment(&mut tx, establishment.id, appointment_id).await?;
        lifecycle::ensure_reschedulable(&current)?;

        let service = scheduling::load_service(&mut tx, establishment.id, current.service_id).await?;
        let employee = scheduling::lock_employee(
            &mut tx,
            establishment.id,
            employee_id.unwrap_or(current.employee_id),
        )
        .await?;
        scheduling::ensure_performs_service(&mut tx, &employee, &service).await?;

        let end = scheduling::validate_slot(
            &mut tx,
            establishment,
            &employee,
            &service,
            date,
            start,
            now,
            SlotPolicy::BackOffice,
            Some(current.id),
        )
        .await?;

        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET employee_id = $2, date = $3, start_time = $4, end_time = $5, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(employee.id)
        .bind(date)
        .bind(start)
        .bind(end)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Rescheduled appointment {} to {} {} with employee {}",
            appointment.id,
            appointment.date,
            appointment.start_time.format("%H:%M"),
            appointment.employee_id
        );

        Ok(appointment)
    }

    /// Cancels a scheduled appointment and releases any reserved package
    /// session.
    pub async fn cancel(
        &self,
        establishment: &Establishment,
        appointment_id: Uuid,
        actor: CancelActor,
        now: NaiveDateTime,
    ) -> Result<Appointment, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = lock_appointment(&mut tx, establishment.id, appointment_id).await?;
        let (customer_phone,) =
            sqlx::query_as::<_, (String,)>("SELECT phone FROM customers WHERE id = $1")
                .bind(current.customer_id)
                .fetch_one(&mut *tx)
                .await?;

        if let Err(e) = lifecycle::ensure_cancellable(&current, &customer_phone, &actor, now) {
            tracing::warn!("Cancellation of appointment {} rejected: {}", current.id, e);
            return Err(e);
        }

        let released = sqlx::query(
            "DELETE FROM customer_service_package_usages WHERE appointment_id = $1",
        )
        .bind(current.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let reason = match &actor {
            CancelActor::Staff { reason } => reason.as_deref().map(|r| format!("Canceled: {}", r)),
            CancelActor::Customer { .. } => Some("Canceled by customer".to_string()),
        };

        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET status = 'canceled',
                canceled_at = now(),
                updated_at = now(),
                notes = CASE
                    WHEN $2::text IS NULL THEN notes
                    WHEN notes IS NULL THEN $2
                    ELSE notes || E'\n' || $2
                END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Canceled appointment {} ({} package session(s) released)",
            appointment.id,
            released
        );

        Ok(appointment)
    }

    /// Completes an appointment: records payment, consumes a package session
    /// or redeems points, and credits loyalty points.
    pub async fn checkin(
        &self,
        establishment: &Establishment,
        appointment_id: Uuid,
        request: &CheckinRequest,
        today: NaiveDate,
    ) -> Result<CheckinResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = lock_appointment(&mut tx, establishment.id, appointment_id).await?;
        lifecycle::ensure_checkin_allowed(&current, today)?;

        // Serialize with other point movements of this customer
        sqlx::query("SELECT id FROM customers WHERE id = $1 FOR UPDATE")
            .bind(current.customer_id)
            .execute(&mut *tx)
            .await?;

        let package = match request.customer_service_package_id {
            Some(package_id) if current.customer_service_package_id.is_none() => Some(
                package_context(
                    &mut tx,
                    establishment.id,
                    current.customer_id,
                    package_id,
                    current.service_id,
                    current.date,
                )
                .await?,
            ),
            _ => None,
        };

        let loyalty = loyalty_context(&mut tx, establishment.id, &current).await?;

        let plan = lifecycle::plan_checkin(&current, request, package, loyalty)?;

        if let Some(package_id) = plan.consume_package {
            record_package_usage(&mut tx, package_id, current.service_id, current.id).await?;
        }

        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET status = 'completed',
                paid_amount_cents = $2,
                payment_method = $3,
                customer_service_package_id = COALESCE(customer_service_package_id, $4),
                checked_in_at = now(),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(plan.paid_cents)
        .bind(plan.payment_method.as_str())
        .bind(plan.consume_package)
        .fetch_one(&mut *tx)
        .await?;

        let mut loyalty_points = 0;
        if let Some((program_id, points)) = plan.loyalty {
            let description = if points < 0 {
                "Reward redeemed"
            } else {
                "Points earned for completed service"
            };
            sqlx::query(
                r#"
                INSERT INTO customer_loyalty_points
                    (id, customer_id, loyalty_program_id, appointment_id, points, description)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(current.customer_id)
            .bind(program_id)
            .bind(current.id)
            .bind(points)
            .bind(description)
            .execute(&mut *tx)
            .await?;
            loyalty_points = points;
        }

        tx.commit().await?;

        tracing::info!(
            "Checked in appointment {}: {} via {}, loyalty {:+}",
            appointment.id,
            crate::money::format_cents(plan.paid_cents),
            plan.payment_method.as_str(),
            loyalty_points
        );

        Ok(CheckinResponse {
            appointment,
            loyalty_points,
            package_session_consumed: plan.payment_method
                == crate::models::PaymentMethod::Package,
        })
    }
}

async fn lock_appointment(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    appointment_id: Uuid,
) -> Result<Appointment, AppError> {
    sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments WHERE id = $1 AND establishment_id = $2 FOR UPDATE",
    )
    .bind(appointment_id)
    .bind(establishment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Appointment not found".to_string()))
}

async fn record_package_usage(
    conn: &mut PgConnection,
    customer_service_package_id: Uuid,
    service_id: Uuid,
    appointment_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO customer_service_package_usages
            (id, customer_service_package_id, service_id, appointment_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(customer_service_package_id)
    .bind(service_id)
    .bind(appointment_id)
    .execute(&mut *conn)
    .await
    .context("recording package usage")?;
    Ok(())
}

/// Locks a customer package and computes its remaining sessions for a
/// service. Fails if the package belongs to someone else, has expired by
/// `on`, or does not include the service.
pub async fn package_context(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    customer_id: Uuid,
    customer_service_package_id: Uuid,
    service_id: Uuid,
    on: NaiveDate,
) -> Result<PackageContext, AppError> {
    let package = sqlx::query_as::<_, CustomerServicePackage>(
        r#"
        SELECT * FROM customer_service_packages
        WHERE id = $1 AND establishment_id = $2 AND customer_id = $3
        FOR UPDATE
        "#,
    )
    .bind(customer_service_package_id)
    .bind(establishment_id)
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Customer package not found".to_string()))?;

    if package.expires_on < on {
        return Err(AppError::BadRequest(format!(
            "Package expired on {}",
            package.expires_on
        )));
    }

    let quantity = sqlx::query_as::<_, (i32,)>(
        "SELECT quantity FROM package_items WHERE package_id = $1 AND service_id = $2",
    )
    .bind(package.package_id)
    .bind(service_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(|(q,)| q)
    .ok_or_else(|| {
        AppError::BadRequest("Package does not include this service".to_string())
    })?;

    let (used,) = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT COUNT(*) FROM customer_service_package_usages
        WHERE customer_service_package_id = $1 AND service_id = $2
        "#,
    )
    .bind(package.id)
    .bind(service_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(PackageContext {
        customer_service_package_id: package.id,
        remaining: lifecycle::remaining_sessions(quantity, used),
    })
}

/// Sum of a customer's ledger for a program.
pub async fn loyalty_balance(
    conn: &mut PgConnection,
    customer_id: Uuid,
    loyalty_program_id: Uuid,
) -> Result<i64, AppError> {
    let (balance,) = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT COALESCE(SUM(points), 0)::BIGINT FROM customer_loyalty_points
        WHERE customer_id = $1 AND loyalty_program_id = $2
        "#,
    )
    .bind(customer_id)
    .bind(loyalty_program_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(balance)
}

async fn loyalty_context(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    appointment: &Appointment,
) -> Result<Option<LoyaltyContext>, AppError> {
    let Some(program) = sqlx::query_as::<_, LoyaltyProgram>(
        "SELECT * FROM loyalty_programs WHERE establishment_id = $1 AND active",
    )
    .bind(establishment_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let rule_points = sqlx::query_as::<_, (i32,)>(
        "SELECT points FROM loyalty_point_rules WHERE loyalty_program_id = $1 AND service_id = $2",
    )
    .bind(program.id)
    .bind(appointment.service_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(|(p,)| p);

    let balance = loyalty_balance(conn, appointment.customer_id, program.id).await?;

    Ok(Some(LoyaltyContext {
        program_id: program.id,
        points_required: program.points_required,
        reward_service_id: program.reward_service_id,
        balance,
        rule_points,
    }))
}

/// Looks up a service that must belong to the establishment.
pub async fn service_of(
    pool: &PgPool,
    establishment_id: Uuid,
    service_id: Uuid,
) -> Result<Service, AppError> {
    let mut conn = pool.acquire().await?;
    scheduling::load_service(&mut conn, establishment_id, service_id).await
}
