use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::availability::Slot;
use crate::models::*;
use crate::money::Money;

// ============ Establishments ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEstablishmentRequest {
    pub name: String,
    pub slug: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub utc_offset_minutes: Option<i32>,
    pub slot_interval_minutes: Option<i32>,
    pub booking_window_days: Option<i32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateEstablishmentRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub utc_offset_minutes: Option<i32>,
    pub slot_interval_minutes: Option<i32>,
    pub booking_window_days: Option<i32>,
}

// ============ Catalog ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateServiceRequest {
    pub name: String,
    pub category_id: Option<Uuid>,
    pub description: Option<String>,
    pub duration_minutes: i32,
    #[schema(value_type = String, example = "49.90")]
    pub price: Money,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub category_id: Option<Uuid>,
    pub description: Option<String>,
    pub duration_minutes: Option<i32>,
    #[schema(value_type = Option<String>, example = "49.90")]
    pub price: Option<Money>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceListQuery {
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
}

// ============ Employees ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEmployeeRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub service_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateEmployeeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetEmployeeServicesRequest {
    pub service_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WorkingHoursEntry {
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: i16,
    #[schema(example = "09:00")]
    pub start_time: String,
    #[schema(example = "18:00")]
    pub end_time: String,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceWorkingHoursRequest {
    pub days: Vec<WorkingHoursEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmployeeWithServices {
    #[serde(flatten)]
    pub employee: Employee,
    pub service_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeListQuery {
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
}

// ============ Schedule blocks ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBlockRequest {
    pub employee_id: Uuid,
    /// One-off block date (`YYYY-MM-DD`); mutually exclusive with `weekday`.
    pub date: Option<String>,
    /// Recurring weekly block; mutually exclusive with `date`.
    pub weekday: Option<i16>,
    pub start_time: String,
    pub end_time: String,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlockListQuery {
    pub employee_id: Option<Uuid>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

// ============ Customers ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCustomerRequest {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateCustomerRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerListQuery {
    /// Matches name (case-insensitive) or phone digits.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============ Appointments ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAppointmentRequest {
    pub customer_id: Uuid,
    pub employee_id: Uuid,
    pub service_id: Uuid,
    #[schema(example = "2024-03-04")]
    pub date: String,
    #[schema(example = "10:00")]
    pub time: String,
    pub customer_service_package_id: Option<Uuid>,
    /// Overrides the service price for this appointment.
    #[schema(value_type = Option<String>, example = "45.00")]
    pub price: Option<Money>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentListQuery {
    pub start_date: String,
    pub end_date: String,
    pub status: Option<String>,
    pub employee_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RescheduleRequest {
    pub date: String,
    pub time: String,
    /// Moves the appointment to another employee.
    pub employee_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckinRequest {
    /// Amount received; defaults to the appointment price.
    #[schema(value_type = Option<String>, example = "49.90")]
    pub amount: Option<Money>,
    pub payment_method: Option<PaymentMethod>,
    /// Consume a session of this customer package.
    pub customer_service_package_id: Option<Uuid>,
    /// Pay the reward service with loyalty points.
    #[serde(default)]
    pub redeem_loyalty: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublicCancelRequest {
    pub phone: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckinResponse {
    pub appointment: Appointment,
    /// Points credited (positive) or redeemed (negative) by this checkin.
    pub loyalty_points: i32,
    pub package_session_consumed: bool,
}

// ============ Availability ============

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub service_id: Uuid,
    pub date: String,
    pub employee_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AvailableSlot {
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:00")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "10:30")]
    pub end: NaiveTime,
    /// Employees free for the whole slot, ordered by name.
    pub employee_ids: Vec<Uuid>,
}

impl AvailableSlot {
    pub fn from_slot(slot: Slot, employee_ids: Vec<Uuid>) -> Self {
        Self {
            start: slot.start,
            end: slot.end,
            employee_ids,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AvailabilityResponse {
    pub date: NaiveDate,
    pub service_id: Uuid,
    pub duration_minutes: i32,
    pub slots: Vec<AvailableSlot>,
}

// ============ Storefront ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublicCustomer {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublicBookingRequest {
    pub service_id: Uuid,
    pub employee_id: Option<Uuid>,
    #[schema(example = "2024-03-04")]
    pub date: String,
    #[schema(example = "10:00")]
    pub time: String,
    pub customer: PublicCustomer,
    pub customer_service_package_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookingResponse {
    pub appointment: Appointment,
    pub employee_name: String,
    pub service_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicEmployeeQuery {
    pub service_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PhoneQuery {
    pub phone: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicEstablishment {
    pub name: String,
    pub slug: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub slot_interval_minutes: i32,
    pub booking_window_days: i32,
}

impl From<&Establishment> for PublicEstablishment {
    fn from(e: &Establishment) -> Self {
        Self {
            name: e.name.clone(),
            slug: e.slug.clone(),
            phone: e.phone.clone(),
            email: e.email.clone(),
            address: e.address.clone(),
            slot_interval_minutes: e.slot_interval_minutes,
            booking_window_days: e.booking_window_days,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicEmployee {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CustomerOverview {
    pub name: String,
    pub upcoming: Vec<AppointmentDetails>,
    pub loyalty: Option<LoyaltyBalance>,
    pub packages: Vec<PackageBalance>,
}

// ============ Packages ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct PackageItemRequest {
    pub service_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePackageRequest {
    pub name: String,
    #[schema(value_type = String, example = "200.00")]
    pub price: Money,
    pub validity_days: i32,
    pub items: Vec<PackageItemRequest>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdatePackageRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<String>, example = "200.00")]
    pub price: Option<Money>,
    pub validity_days: Option<i32>,
    pub active: Option<bool>,
    /// Replaces the item list when present.
    pub items: Option<Vec<PackageItemRequest>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PackageWithItems {
    #[serde(flatten)]
    pub package: Package,
    pub items: Vec<PackageItem>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SellPackageRequest {
    pub package_id: Uuid,
    /// Defaults to the package price.
    #[schema(value_type = Option<String>, example = "200.00")]
    pub paid_amount: Option<Money>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PackageItemBalance {
    pub service_id: Uuid,
    pub service_name: String,
    pub quantity: i32,
    pub used: i32,
    pub remaining: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PackageBalance {
    pub customer_package: CustomerServicePackage,
    pub package_name: String,
    pub expired: bool,
    pub items: Vec<PackageItemBalance>,
}

// ============ Loyalty ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoyaltyProgramRequest {
    pub name: String,
    pub points_required: i32,
    pub reward_service_id: Uuid,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoyaltyRuleRequest {
    pub service_id: Uuid,
    pub points: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoyaltyProgramWithRules {
    #[serde(flatten)]
    pub program: LoyaltyProgram,
    pub rules: Vec<LoyaltyPointRule>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoyaltyBalance {
    pub loyalty_program_id: Uuid,
    pub balance: i64,
    pub points_required: i32,
    pub reward_service_id: Uuid,
    pub can_redeem: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoyaltyStatement {
    #[serde(flatten)]
    pub balance: LoyaltyBalance,
    pub entries: Vec<CustomerLoyaltyPoint>,
}

// ============ Dashboard ============

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: String,
    pub end_date: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct StatusCounts {
    pub scheduled: i64,
    pub completed: i64,
    pub canceled: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[schema(value_type = String, example = "1520.00")]
    pub revenue: Money,
    #[schema(value_type = String, example = "320.00")]
    pub package_sales: Money,
    pub appointments: StatusCounts,
    #[schema(value_type = String, example = "54.28")]
    pub average_ticket: Money,
    pub new_customers: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AverageTicketResponse {
    #[schema(value_type = String, example = "54.28")]
    pub average_ticket: Money,
    pub completed: i64,
    #[schema(value_type = String, example = "1520.00")]
    pub revenue: Money,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopService {
    pub service_id: Uuid,
    pub service_name: String,
    pub completed: i64,
    #[schema(value_type = String, example = "450.00")]
    pub revenue: Money,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub completed: i64,
    #[schema(value_type = String, example = "300.00")]
    pub revenue: Money,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmployeePerformance {
    pub employee_id: Uuid,
    pub employee_name: String,
    pub completed: i64,
    pub canceled: i64,
    #[schema(value_type = String, example = "780.00")]
    pub revenue: Money,
}

// ============ Plans & subscriptions ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePlanRequest {
    pub name: String,
    #[schema(value_type = String, example = "99.90")]
    pub price: Money,
    pub max_employees: i32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<String>, example = "99.90")]
    pub price: Option<Money>,
    pub max_employees: Option<i32>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub plan_id: Uuid,
    /// Length of the first billing period, 30 days by default.
    pub period_days: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionWithPlan {
    pub subscription: Subscription,
    pub plan: Plan,
}

// ============ Tokens ============

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IssueTokenRequest {
    pub label: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssuedToken {
    pub id: Uuid,
    pub establishment_id: Uuid,
    /// Shown once; only its hash is stored.
    pub token: String,
}
