//! Appointment state machine.
//!
//! ```text
//!   scheduled ──checkin──▶ completed
//!       │
//!       └──────cancel────▶ canceled
//! ```
//!
//! `completed` and `canceled` are terminal. The guards and the checkin
//! settlement plan are pure; `db_storage` applies them inside a transaction.

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::api_models::CheckinRequest;
use crate::errors::AppError;
use crate::models::{Appointment, AppointmentStatus, PaymentMethod};

/// Who is cancelling, which decides the timing rule.
#[derive(Debug, Clone)]
pub enum CancelActor {
    /// Customer on the storefront, identified by phone (already normalized).
    Customer { phone: String },
    /// Back-office user; may cancel past appointments (no-shows).
    Staff { reason: Option<String> },
}

fn require_scheduled(appointment: &Appointment, action: &str) -> Result<(), AppError> {
    match appointment.status()? {
        AppointmentStatus::Scheduled => Ok(()),
        status => Err(AppError::BadRequest(format!(
            "Cannot {} an appointment that is {}",
            action, status
        ))),
    }
}

/// Checks whether `actor` may cancel `appointment` at local time `now`.
pub fn ensure_cancellable(
    appointment: &Appointment,
    customer_phone: &str,
    actor: &CancelActor,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    require_scheduled(appointment, "cancel")?;

    if let CancelActor::Customer { phone } = actor {
        if phone != customer_phone {
            // Same message as a missing appointment so foreign ids stay hidden
            return Err(AppError::NotFound("Appointment not found".to_string()));
        }
        if now >= appointment.starts_at() {
            return Err(AppError::BadRequest(
                "Cannot cancel an appointment that already started or ended".to_string(),
            ));
        }
    }

    Ok(())
}

pub fn ensure_reschedulable(appointment: &Appointment) -> Result<(), AppError> {
    require_scheduled(appointment, "reschedule")
}

/// Checkin is allowed for scheduled appointments on or before today.
pub fn ensure_checkin_allowed(appointment: &Appointment, today: NaiveDate) -> Result<(), AppError> {
    require_scheduled(appointment, "check in")?;
    if appointment.date > today {
        return Err(AppError::BadRequest(format!(
            "Cannot check in an appointment scheduled for {} before that day",
            appointment.date
        )));
    }
    Ok(())
}

/// Remaining sessions of a package item.
pub fn remaining_sessions(quantity: i32, used: i64) -> i32 {
    (i64::from(quantity) - used).max(0) as i32
}

/// Loyalty facts relevant to one checkin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyContext {
    pub program_id: Uuid,
    pub points_required: i32,
    pub reward_service_id: Uuid,
    pub balance: i64,
    /// Points the program awards for this appointment's service, if any.
    pub rule_points: Option<i32>,
}

/// Package facts relevant to one checkin, when a package id was supplied at
/// checkin time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageContext {
    pub customer_service_package_id: Uuid,
    pub remaining: i32,
}

/// What a checkin writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckinPlan {
    pub payment_method: PaymentMethod,
    pub paid_cents: i64,
    /// Package whose session must be recorded now. `None` when the session was
    /// already reserved at booking or no package is involved.
    pub consume_package: Option<Uuid>,
    /// Ledger entry to write: positive credit or negative redemption.
    pub loyalty: Option<(Uuid, i32)>,
}

/// Decides how a checkin settles: loyalty redemption, package session, or
/// a regular payment, plus any loyalty accrual.
pub fn plan_checkin(
    appointment: &Appointment,
    request: &CheckinRequest,
    package: Option<PackageContext>,
    loyalty: Option<LoyaltyContext>,
) -> Result<CheckinPlan, AppError> {
    let uses_package =
        appointment.customer_service_package_id.is_some() || request.customer_service_package_id.is_some();

    if request.redeem_loyalty {
        if uses_package {
            return Err(AppError::BadRequest(
                "Cannot redeem loyalty points on an appointment paid with a package".to_string(),
            ));
        }
        let program = loyalty.ok_or_else(|| {
            AppError::BadRequest("Establishment has no active loyalty program".to_string())
        })?;
        if program.reward_service_id != appointment.service_id {
            return Err(AppError::BadRequest(
                "Only the loyalty reward service can be redeemed with points".to_string(),
            ));
        }
        if program.balance < i64::from(program.points_required) {
            return Err(AppError::BadRequest(format!(
                "Insufficient loyalty points: {} of {} required",
                program.balance, program.points_required
            )));
        }
        return Ok(CheckinPlan {
            payment_method: PaymentMethod::Loyalty,
            paid_cents: 0,
            consume_package: None,
            loyalty: Some((program.program_id, -program.points_required)),
        });
    }

    let accrual = loyalty.and_then(|l| l.rule_points.map(|p| (l.program_id, p)));

    if appointment.customer_service_package_id.is_some() {
        if let (Some(requested), Some(attached)) = (
            request.customer_service_package_id,
            appointment.customer_service_package_id,
        ) {
            if requested != attached {
                return Err(AppError::BadRequest(
                    "Appointment is already tied to a different package".to_string(),
                ));
            }
        }
        return Ok(CheckinPlan {
            payment_method: PaymentMethod::Package,
            paid_cents: 0,
            consume_package: None,
            loyalty: accrual,
        });
    }

    if let Some(requested) = request.customer_service_package_id {
        let package = package
            .filter(|p| p.customer_service_package_id == requested)
            .ok_or_else(|| AppError::NotFound("Customer package not found".to_string()))?;
        if package.remaining <= 0 {
            return Err(AppError::BadRequest(
                "Package has no remaining sessions for this service".to_string(),
            ));
        }
        return Ok(CheckinPlan {
            payment_method: PaymentMethod::Package,
            paid_cents: 0,
            consume_package: Some(requested),
            loyalty: accrual,
        });
    }

    let method = request.payment_method.ok_or_else(|| {
        AppError::BadRequest("payment_method is required to check in".to_string())
    })?;
    if !method.is_monetary() {
        return Err(AppError::BadRequest(format!(
            "Payment method '{}' needs a package id or redeem_loyalty",
            method.as_str()
        )));
    }

    Ok(CheckinPlan {
        payment_method: method,
        paid_cents: request
            .amount
            .map(|m| m.cents())
            .unwrap_or(appointment.price.cents()),
        consume_package: None,
        loyalty: accrual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use chrono::{NaiveTime, Utc};

    fn appointment(status: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            establishment_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            customer_service_package_id: None,
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            status: status.to_string(),
            price: Money(5000),
            paid_amount: None,
            payment_method: None,
            notes: None,
            checked_in_at: None,
            canceled_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn customer(phone: &str) -> CancelActor {
        CancelActor::Customer {
            phone: phone.to_string(),
        }
    }

    const PHONE: &str = "+5511987654321";

    #[test]
    fn customer_can_cancel_before_start() {
        let appt = appointment("scheduled");
        assert!(ensure_cancellable(&appt, PHONE, &customer(PHONE), at(9, 59)).is_ok());
    }

    #[test]
    fn customer_cannot_cancel_started_or_past_appointment() {
        let appt = appointment("scheduled");
        let err = ensure_cancellable(&appt, PHONE, &customer(PHONE), at(10, 0)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = ensure_cancellable(&appt, PHONE, &customer(PHONE), at(11, 0)).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn customer_phone_must_match() {
        let appt = appointment("scheduled");
        let err =
            ensure_cancellable(&appt, PHONE, &customer("+5521999998888"), at(8, 0)).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn staff_can_cancel_no_shows() {
        let appt = appointment("scheduled");
        let staff = CancelActor::Staff { reason: None };
        assert!(ensure_cancellable(&appt, PHONE, &staff, at(18, 0)).is_ok());
    }

    #[test]
    fn terminal_states_cannot_transition() {
        for status in ["completed", "canceled"] {
            let appt = appointment(status);
            let staff = CancelActor::Staff { reason: None };
            assert!(ensure_cancellable(&appt, PHONE, &staff, at(8, 0)).is_err());
            assert!(ensure_reschedulable(&appt).is_err());
            assert!(ensure_checkin_allowed(&appt, appt.date).is_err());
        }
    }

    #[test]
    fn checkin_not_allowed_before_the_day() {
        let appt = appointment("scheduled");
        let yesterday = appt.date.pred_opt().unwrap();
        assert!(ensure_checkin_allowed(&appt, yesterday).is_err());
        assert!(ensure_checkin_allowed(&appt, appt.date).is_ok());
        assert!(ensure_checkin_allowed(&appt, appt.date.succ_opt().unwrap()).is_ok());
    }

    #[test]
    fn regular_checkin_defaults_to_price_and_accrues_points() {
        let appt = appointment("scheduled");
        let program_id = Uuid::new_v4();
        let request = CheckinRequest {
            payment_method: Some(PaymentMethod::Pix),
            ..Default::default()
        };
        let loyalty = LoyaltyContext {
            program_id,
            points_required: 100,
            reward_service_id: Uuid::new_v4(),
            balance: 0,
            rule_points: Some(10),
        };
        let plan = plan_checkin(&appt, &request, None, Some(loyalty)).unwrap();
        assert_eq!(plan.payment_method, PaymentMethod::Pix);
        assert_eq!(plan.paid_cents, 5000);
        assert_eq!(plan.loyalty, Some((program_id, 10)));
        assert_eq!(plan.consume_package, None);
    }

    #[test]
    fn regular_checkin_requires_monetary_method() {
        let appt = appointment("scheduled");
        assert!(plan_checkin(&appt, &CheckinRequest::default(), None, None).is_err());
        let request = CheckinRequest {
            payment_method: Some(PaymentMethod::Package),
            ..Default::default()
        };
        assert!(plan_checkin(&appt, &request, None, None).is_err());
    }

    #[test]
    fn explicit_amount_overrides_price() {
        let appt = appointment("scheduled");
        let request = CheckinRequest {
            payment_method: Some(PaymentMethod::Cash),
            amount: Some(Money(4500)),
            ..Default::default()
        };
        let plan = plan_checkin(&appt, &request, None, None).unwrap();
        assert_eq!(plan.paid_cents, 4500);
        assert_eq!(plan.loyalty, None);
    }

    #[test]
    fn package_reserved_at_booking_is_settled_without_payment() {
        let mut appt = appointment("scheduled");
        appt.customer_service_package_id = Some(Uuid::new_v4());
        let plan = plan_checkin(&appt, &CheckinRequest::default(), None, None).unwrap();
        assert_eq!(plan.payment_method, PaymentMethod::Package);
        assert_eq!(plan.paid_cents, 0);
        assert_eq!(plan.consume_package, None);
    }

    #[test]
    fn package_given_at_checkin_is_consumed() {
        let appt = appointment("scheduled");
        let package_id = Uuid::new_v4();
        let request = CheckinRequest {
            customer_service_package_id: Some(package_id),
            ..Default::default()
        };
        let context = PackageContext {
            customer_service_package_id: package_id,
            remaining: 2,
        };
        let plan = plan_checkin(&appt, &request, Some(context), None).unwrap();
        assert_eq!(plan.consume_package, Some(package_id));

        let exhausted = PackageContext {
            remaining: 0,
            ..context
        };
        assert!(plan_checkin(&appt, &request, Some(exhausted), None).is_err());
    }

    #[test]
    fn loyalty_redemption_requires_balance_and_reward_service() {
        let appt = appointment("scheduled");
        let program_id = Uuid::new_v4();
        let request = CheckinRequest {
            redeem_loyalty: true,
            ..Default::default()
        };
        let mut loyalty = LoyaltyContext {
            program_id,
            points_required: 100,
            reward_service_id: appt.service_id,
            balance: 120,
            rule_points: Some(10),
        };

        let plan = plan_checkin(&appt, &request, None, Some(loyalty)).unwrap();
        assert_eq!(plan.payment_method, PaymentMethod::Loyalty);
        assert_eq!(plan.paid_cents, 0);
        assert_eq!(plan.loyalty, Some((program_id, -100)));

        loyalty.balance = 99;
        assert!(plan_checkin(&appt, &request, None, Some(loyalty)).is_err());

        loyalty.balance = 500;
        loyalty.reward_service_id = Uuid::new_v4();
        assert!(plan_checkin(&appt, &request, None, Some(loyalty)).is_err());

        assert!(plan_checkin(&appt, &request, None, None).is_err());
    }

    #[test]
    fn remaining_sessions_never_negative() {
        assert_eq!(remaining_sessions(5, 2), 3);
        assert_eq!(remaining_sessions(2, 3), 0);
    }
}
