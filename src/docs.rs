use utoipa::OpenApi;

use crate::api_models::*;
use crate::models::*;

/// OpenAPI document served at `/api-docs/openapi.json` and browsed at `/docs`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Agenda API",
        description = "Multi-tenant appointment booking: back-office under \
                       /api/v1/establishments/{eid} (Bearer token), public storefront \
                       under /api/v1/public/{slug}."
    ),
    components(schemas(
        // Records
        Establishment,
        Category,
        Service,
        Employee,
        WorkingHours,
        ScheduleBlock,
        Customer,
        Appointment,
        AppointmentDetails,
        AppointmentStatus,
        PaymentMethod,
        SubscriptionStatus,
        Package,
        PackageItem,
        CustomerServicePackage,
        CustomerServicePackageUsage,
        LoyaltyProgram,
        LoyaltyPointRule,
        CustomerLoyaltyPoint,
        Plan,
        Subscription,
        ApiToken,
        // Back-office requests and responses
        CreateEstablishmentRequest,
        UpdateEstablishmentRequest,
        CategoryRequest,
        CreateServiceRequest,
        UpdateServiceRequest,
        CreateEmployeeRequest,
        UpdateEmployeeRequest,
        SetEmployeeServicesRequest,
        WorkingHoursEntry,
        ReplaceWorkingHoursRequest,
        EmployeeWithServices,
        CreateBlockRequest,
        CreateCustomerRequest,
        UpdateCustomerRequest,
        CreateAppointmentRequest,
        RescheduleRequest,
        CheckinRequest,
        CheckinResponse,
        CancelRequest,
        AvailableSlot,
        AvailabilityResponse,
        PackageItemRequest,
        CreatePackageRequest,
        UpdatePackageRequest,
        PackageWithItems,
        SellPackageRequest,
        PackageItemBalance,
        PackageBalance,
        LoyaltyProgramRequest,
        LoyaltyRuleRequest,
        LoyaltyProgramWithRules,
        LoyaltyBalance,
        LoyaltyStatement,
        StatusCounts,
        DashboardSummary,
        AverageTicketResponse,
        TopService,
        DailyRevenue,
        EmployeePerformance,
        CreatePlanRequest,
        UpdatePlanRequest,
        SubscribeRequest,
        SubscriptionWithPlan,
        IssueTokenRequest,
        IssuedToken,
        // Storefront
        PublicEstablishment,
        PublicEmployee,
        PublicCustomer,
        PublicBookingRequest,
        PublicCancelRequest,
        BookingResponse,
        CustomerOverview,
    )),
    tags(
        (name = "back-office", description = "Establishment management"),
        (name = "storefront", description = "Public booking")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_core_schemas() {
        let doc = ApiDoc::openapi();
        let schemas = &doc.components.expect("components").schemas;
        for name in ["Appointment", "AvailabilityResponse", "PublicBookingRequest", "CheckinRequest"] {
            assert!(schemas.contains_key(name), "missing schema {}", name);
        }
    }
}
