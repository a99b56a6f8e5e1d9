use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::availability::{BlockRule, Interval, WorkingDay};
use crate::errors::AppError;
use crate::money::Money;

/// `HH:MM` (de)serialization for `NaiveTime` fields.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|_| serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", raw)))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => super::serialize(t, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|r| {
                NaiveTime::parse_from_str(r.trim(), "%H:%M").map_err(|_| {
                    serde::de::Error::custom(format!("invalid time '{}', expected HH:MM", r))
                })
            })
            .transpose()
        }
    }
}

// ============ Enums ============

/// Appointment lifecycle state. `Completed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "completed" => Ok(AppointmentStatus::Completed),
            "canceled" => Ok(AppointmentStatus::Canceled),
            other => Err(AppError::BadRequest(format!(
                "Unknown appointment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    DebitCard,
    Pix,
    /// Session consumed from a prepaid package.
    Package,
    /// Reward service paid with loyalty points.
    Loyalty,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Package => "package",
            PaymentMethod::Loyalty => "loyalty",
        }
    }

    /// Methods where money actually changes hands.
    pub fn is_monetary(&self) -> bool {
        !matches!(self, PaymentMethod::Package | PaymentMethod::Loyalty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

// ============ Database Models ============

/// A tenant business (salon, clinic).
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Establishment {
    pub id: Uuid,
    pub name: String,
    /// Public storefront identifier.
    pub slug: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    /// Offset of the establishment's wall clock from UTC.
    pub utc_offset_minutes: i32,
    /// Granularity of offered start times.
    pub slot_interval_minutes: i32,
    /// How far ahead customers may book.
    pub booking_window_days: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Establishment {
    /// Current wall-clock time at the establishment.
    pub fn local_now(&self) -> NaiveDateTime {
        self.local_time_at(Utc::now())
    }

    pub fn local_time_at(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.naive_utc() + Duration::minutes(i64::from(self.utc_offset_minutes))
    }
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Category {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Service {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    #[sqlx(rename = "price_cents")]
    #[schema(value_type = String, example = "49.90")]
    pub price: Money,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Employee {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Working hours of an employee on one weekday (0 = Sunday).
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct WorkingHours {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub weekday: i16,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "09:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "18:00")]
    pub end_time: NaiveTime,
    #[serde(with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "12:00")]
    pub break_start: Option<NaiveTime>,
    #[serde(with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "13:00")]
    pub break_end: Option<NaiveTime>,
}

impl WorkingHours {
    pub fn to_working_day(&self) -> Result<WorkingDay, AppError> {
        let break_time = match (self.break_start, self.break_end) {
            (Some(s), Some(e)) => Some(Interval::new(s, e)?),
            _ => None,
        };
        Ok(WorkingDay {
            hours: Interval::new(self.start_time, self.end_time)?,
            break_time,
        })
    }
}

/// A blocked period: one-off when `date` is set, weekly when `weekday` is set.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct ScheduleBlock {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub employee_id: Uuid,
    pub date: Option<NaiveDate>,
    pub weekday: Option<i16>,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "14:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "15:00")]
    pub end_time: NaiveTime,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleBlock {
    pub fn to_rule(&self) -> Result<BlockRule, AppError> {
        Ok(BlockRule {
            date: self.date,
            weekday: self.weekday,
            interval: Interval::new(self.start_time, self.end_time)?,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Customer {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    /// E.164 phone number, unique per establishment.
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Appointment {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub customer_id: Uuid,
    pub employee_id: Uuid,
    pub service_id: Uuid,
    pub customer_service_package_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:30")]
    pub end_time: NaiveTime,
    /// One of `scheduled`, `completed`, `canceled`.
    pub status: String,
    #[sqlx(rename = "price_cents")]
    #[schema(value_type = String, example = "49.90")]
    pub price: Money,
    #[sqlx(rename = "paid_amount_cents")]
    #[schema(value_type = Option<String>, example = "49.90")]
    pub paid_amount: Option<Money>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn status(&self) -> Result<AppointmentStatus, AppError> {
        self.status.parse()
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

/// Appointment joined with the names the back-office lists show.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct AppointmentDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub appointment: Appointment,
    pub customer_name: String,
    pub customer_phone: String,
    pub employee_name: String,
    pub service_name: String,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Package {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    #[sqlx(rename = "price_cents")]
    #[schema(value_type = String, example = "200.00")]
    pub price: Money,
    /// Days a purchased package stays usable.
    pub validity_days: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct PackageItem {
    pub id: Uuid,
    pub package_id: Uuid,
    pub service_id: Uuid,
    pub quantity: i32,
}

/// A package bought by a customer.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct CustomerServicePackage {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub customer_id: Uuid,
    pub package_id: Uuid,
    #[sqlx(rename = "paid_amount_cents")]
    #[schema(value_type = String, example = "200.00")]
    pub paid_amount: Money,
    pub payment_method: String,
    pub purchased_at: DateTime<Utc>,
    pub expires_on: NaiveDate,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct CustomerServicePackageUsage {
    pub id: Uuid,
    pub customer_service_package_id: Uuid,
    pub service_id: Uuid,
    pub appointment_id: Uuid,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct LoyaltyProgram {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub name: String,
    pub points_required: i32,
    pub reward_service_id: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct LoyaltyPointRule {
    pub id: Uuid,
    pub loyalty_program_id: Uuid,
    pub service_id: Uuid,
    pub points: i32,
}

/// Ledger entry; negative points are redemptions.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct CustomerLoyaltyPoint {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub loyalty_program_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub points: i32,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// SaaS plan an establishment subscribes to.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    #[sqlx(rename = "price_cents")]
    #[schema(value_type = String, example = "99.90")]
    pub price: Money,
    pub max_employees: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Subscription {
    pub id: Uuid,
    pub establishment_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub current_period_end: NaiveDate,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct ApiToken {
    pub id: Uuid,
    pub establishment_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Completed,
            AppointmentStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn subscription_status_text_matches_serde() {
        for status in [SubscriptionStatus::Active, SubscriptionStatus::Canceled] {
            let wire = serde_json::to_value(status).unwrap();
            assert_eq!(wire, status.as_str());
        }
        assert_eq!(SubscriptionStatus::Canceled.as_str(), "canceled");
    }

    #[test]
    fn payment_method_wire_names() {
        let method: PaymentMethod = serde_json::from_str("\"credit_card\"").unwrap();
        assert_eq!(method, PaymentMethod::CreditCard);
        assert_eq!(method.as_str(), "credit_card");
        assert!(!PaymentMethod::Package.is_monetary());
        assert!(PaymentMethod::Pix.is_monetary());
    }

    #[test]
    fn local_time_applies_offset() {
        let establishment = Establishment {
            id: Uuid::nil(),
            name: "Salão".to_string(),
            slug: "salao".to_string(),
            phone: None,
            email: None,
            address: None,
            utc_offset_minutes: -180,
            slot_interval_minutes: 15,
            booking_window_days: 60,
            created_at: Utc::now(),
            updated_at: None,
        };
        let instant = DateTime::parse_from_rfc3339("2024-03-04T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            establishment.local_time_at(instant),
            NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn working_hours_convert_to_working_day() {
        let hours = WorkingHours {
            id: Uuid::nil(),
            employee_id: Uuid::nil(),
            weekday: 1,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            break_start: NaiveTime::from_hms_opt(12, 0, 0),
            break_end: NaiveTime::from_hms_opt(13, 0, 0),
        };
        let day = hours.to_working_day().unwrap();
        assert!(day.break_time.is_some());
        let json = serde_json::to_value(&hours).unwrap();
        assert_eq!(json["start_time"], "09:00");
        assert_eq!(json["break_end"], "13:00");
    }
}
