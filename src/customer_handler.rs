use crate::api_models::*;
use crate::auth::AuthContext;
use crate::db_storage;
use crate::errors::AppError;
use crate::handlers::{load_establishment, AppState};
use crate::lifecycle;
use crate::models::*;
use crate::money::Money;
use crate::validation;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// Clamps pagination parameters to sane bounds.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).max(0),
    )
}

pub async fn load_customer(
    db: &PgPool,
    establishment_id: Uuid,
    customer_id: Uuid,
) -> Result<Customer, AppError> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1 AND establishment_id = $2")
        .bind(customer_id)
        .bind(establishment_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Customer {} not found", customer_id)))
}

fn duplicate_phone(e: AppError, phone: &str) -> AppError {
    match e {
        AppError::Conflict(_) => {
            AppError::Conflict(format!("A customer with phone {} already exists", phone))
        }
        other => other,
    }
}

/// Current loyalty balance of a customer under the establishment's active
/// program, if there is one.
pub async fn loyalty_balance_of(
    db: &PgPool,
    establishment_id: Uuid,
    customer_id: Uuid,
) -> Result<Option<LoyaltyBalance>, AppError> {
    let Some(program) = sqlx::query_as::<_, LoyaltyProgram>(
        "SELECT * FROM loyalty_programs WHERE establishment_id = $1 AND active",
    )
    .bind(establishment_id)
    .fetch_optional(db)
    .await?
    else {
        return Ok(None);
    };

    let mut conn = db.acquire().await?;
    let balance = db_storage::loyalty_balance(&mut conn, customer_id, program.id).await?;

    Ok(Some(LoyaltyBalance {
        loyalty_program_id: program.id,
        balance,
        points_required: program.points_required,
        reward_service_id: program.reward_service_id,
        can_redeem: balance >= i64::from(program.points_required),
    }))
}

#[derive(sqlx::FromRow)]
struct ItemUsage {
    service_id: Uuid,
    service_name: String,
    quantity: i32,
    used: i64,
}

/// Per-service session balances of a customer's packages. With
/// `only_usable` set, expired or exhausted packages are left out.
pub async fn package_balances(
    db: &PgPool,
    establishment_id: Uuid,
    customer_id: Uuid,
    today: NaiveDate,
    only_usable: bool,
) -> Result<Vec<PackageBalance>, AppError> {
    let owned = sqlx::query_as::<_, CustomerServicePackage>(
        r#"
        SELECT * FROM customer_service_packages
        WHERE establishment_id = $1 AND customer_id = $2
        ORDER BY purchased_at DESC
        "#,
    )
    .bind(establishment_id)
    .bind(customer_id)
    .fetch_all(db)
    .await?;

    let mut balances = Vec::with_capacity(owned.len());
    for customer_package in owned {
        let expired = customer_package.expires_on < today;
        if only_usable && expired {
            continue;
        }

        let (package_name,) = sqlx::query_as::<_, (String,)>("SELECT name FROM packages WHERE id = $1")
            .bind(customer_package.package_id)
            .fetch_one(db)
            .await?;

        let items = sqlx::query_as::<_, ItemUsage>(
            r#"
            SELECT pi.service_id, s.name AS service_name, pi.quantity, COUNT(u.id) AS used
            FROM package_items pi
            JOIN services s ON s.id = pi.service_id
            LEFT JOIN customer_service_package_usages u
                   ON u.customer_service_package_id = $1 AND u.service_id = pi.service_id
            WHERE pi.package_id = $2
            GROUP BY pi.service_id, s.name, pi.quantity
            ORDER BY s.name
            "#,
        )
        .bind(customer_package.id)
        .bind(customer_package.package_id)
        .fetch_all(db)
        .await?
        .into_iter()
        .map(|i| PackageItemBalance {
            remaining: lifecycle::remaining_sessions(i.quantity, i.used),
            used: i.used.min(i64::from(i32::MAX)) as i32,
            service_id: i.service_id,
            service_name: i.service_name,
            quantity: i.quantity,
        })
        .collect::<Vec<_>>();

        if only_usable && items.iter().all(|i| i.remaining == 0) {
            continue;
        }

        balances.push(PackageBalance {
            customer_package,
            package_name,
            expired,
            items,
        });
    }

    Ok(balances)
}

/// Finds a customer by normalized phone or creates one. An existing
/// customer keeps their stored name.
pub async fn upsert_customer_by_phone(
    db: &PgPool,
    establishment_id: Uuid,
    name: &str,
    phone: &str,
    email: Option<String>,
) -> Result<Customer, AppError> {
    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (id, establishment_id, name, phone, email)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (establishment_id, phone)
        DO UPDATE SET email = COALESCE(customers.email, EXCLUDED.email)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment_id)
    .bind(name)
    .bind(phone)
    .bind(email)
    .fetch_one(db)
    .await?;

    Ok(customer)
}

// ============ Handlers ============

/// GET /api/v1/establishments/:eid/customers
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<CustomerListQuery>,
) -> Result<Json<Vec<Customer>>, AppError> {
    tracing::info!("GET /establishments/{}/customers - {:?}", eid, params);
    auth.require_establishment(eid)?;

    let (limit, offset) = page(params.limit, params.offset);
    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let name_pattern = search.map(|s| format!("%{}%", s));
    let digits = search
        .map(|s| s.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|d| !d.is_empty())
        .map(|d| format!("%{}%", d));

    let customers = sqlx::query_as::<_, Customer>(
        r#"
        SELECT * FROM customers
        WHERE establishment_id = $1
          AND ($2::text IS NULL OR name ILIKE $2 OR ($3::text IS NOT NULL AND phone LIKE $3))
        ORDER BY name
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(eid)
    .bind(name_pattern)
    .bind(digits)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(customers))
}

/// POST /api/v1/establishments/:eid/customers
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    tracing::info!("POST /establishments/{}/customers", eid);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let name = validation::require_name("name", &req.name)?;
    let phone = validation::normalize_phone(&req.phone)?;
    let email = validation::normalize_email(req.email.as_deref())?;
    let birth_date = req
        .birth_date
        .as_deref()
        .map(validation::parse_date)
        .transpose()?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (id, establishment_id, name, phone, email, birth_date, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(&name)
    .bind(&phone)
    .bind(email)
    .bind(birth_date)
    .bind(req.notes.as_deref())
    .fetch_one(&state.db)
    .await
    .map_err(|e| duplicate_phone(e.into(), &phone))?;

    Ok((StatusCode::CREATED, Json(customer)))
}

/// GET /api/v1/establishments/:eid/customers/:customer_id
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Customer>, AppError> {
    tracing::info!("GET /establishments/{}/customers/{}", eid, customer_id);
    auth.require_establishment(eid)?;
    Ok(Json(load_customer(&state.db, eid, customer_id).await?))
}

/// PUT /api/v1/establishments/:eid/customers/:customer_id
pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, customer_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateCustomerRequest>,
) -> Result<Json<Customer>, AppError> {
    tracing::info!("PUT /establishments/{}/customers/{}", eid, customer_id);
    auth.require_establishment(eid)?;

    let name = req
        .name
        .as_deref()
        .map(|n| validation::require_name("name", n))
        .transpose()?;
    let phone = req
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;
    let email = validation::normalize_email(req.email.as_deref())?;
    let birth_date = req
        .birth_date
        .as_deref()
        .map(validation::parse_date)
        .transpose()?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        UPDATE customers SET
            name = COALESCE($3, name),
            phone = COALESCE($4, phone),
            email = COALESCE($5, email),
            birth_date = COALESCE($6, birth_date),
            notes = COALESCE($7, notes),
            updated_at = now()
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(customer_id)
    .bind(eid)
    .bind(name)
    .bind(phone.as_deref())
    .bind(email)
    .bind(birth_date)
    .bind(req.notes.as_deref())
    .fetch_optional(&state.db)
    .await
    .map_err(|e| duplicate_phone(e.into(), phone.as_deref().unwrap_or_default()))?
    .ok_or_else(|| AppError::NotFound(format!("Customer {} not found", customer_id)))?;

    Ok(Json(customer))
}

/// DELETE /api/v1/establishments/:eid/customers/:customer_id
///
/// Customers with appointment history cannot be deleted.
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /establishments/{}/customers/{}", eid, customer_id);
    auth.require_establishment(eid)?;
    load_customer(&state.db, eid, customer_id).await?;

    let (appointments,) =
        sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM appointments WHERE customer_id = $1")
            .bind(customer_id)
            .fetch_one(&state.db)
            .await?;
    if appointments > 0 {
        tracing::warn!(
            "Refusing to delete customer {} with {} appointment(s)",
            customer_id,
            appointments
        );
        return Err(AppError::Conflict(
            "Customer has appointments and cannot be deleted".to_string(),
        ));
    }

    sqlx::query("DELETE FROM customers WHERE id = $1")
        .bind(customer_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/establishments/:eid/customers/:customer_id/loyalty
///
/// Balance and ledger under the active loyalty program.
pub async fn get_customer_loyalty(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<LoyaltyStatement>, AppError> {
    tracing::info!("GET /establishments/{}/customers/{}/loyalty", eid, customer_id);
    auth.require_establishment(eid)?;
    load_customer(&state.db, eid, customer_id).await?;

    let balance = loyalty_balance_of(&state.db, eid, customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Establishment has no active loyalty program".to_string()))?;

    let entries = sqlx::query_as::<_, CustomerLoyaltyPoint>(
        r#"
        SELECT * FROM customer_loyalty_points
        WHERE customer_id = $1 AND loyalty_program_id = $2
        ORDER BY created_at DESC
        "#,
    )
    .bind(customer_id)
    .bind(balance.loyalty_program_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(LoyaltyStatement { balance, entries }))
}

/// GET /api/v1/establishments/:eid/customers/:customer_id/packages
pub async fn list_customer_packages(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, customer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<PackageBalance>>, AppError> {
    tracing::info!("GET /establishments/{}/customers/{}/packages", eid, customer_id);
    let establishment = load_establishment(&state, &auth, eid).await?;
    load_customer(&state.db, eid, customer_id).await?;

    let today = establishment.local_now().date();
    Ok(Json(
        package_balances(&state.db, eid, customer_id, today, false).await?,
    ))
}

/// POST /api/v1/establishments/:eid/customers/:customer_id/packages
///
/// Sells a package. It expires `validity_days` after the purchase date.
pub async fn sell_package(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, customer_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SellPackageRequest>,
) -> Result<(StatusCode, Json<CustomerServicePackage>), AppError> {
    tracing::info!(
        "POST /establishments/{}/customers/{}/packages - package {}",
        eid,
        customer_id,
        req.package_id
    );
    let establishment = load_establishment(&state, &auth, eid).await?;
    load_customer(&state.db, eid, customer_id).await?;

    if !req.payment_method.is_monetary() {
        return Err(AppError::BadRequest(format!(
            "Packages cannot be paid with '{}'",
            req.payment_method.as_str()
        )));
    }

    let package = sqlx::query_as::<_, Package>(
        "SELECT * FROM packages WHERE id = $1 AND establishment_id = $2 AND active",
    )
    .bind(req.package_id)
    .bind(eid)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Package {} not found", req.package_id)))?;

    let paid: Money = req.paid_amount.unwrap_or(package.price);
    let expires_on =
        establishment.local_now().date() + Duration::days(i64::from(package.validity_days));

    let sold = sqlx::query_as::<_, CustomerServicePackage>(
        r#"
        INSERT INTO customer_service_packages
            (id, establishment_id, customer_id, package_id, paid_amount_cents, payment_method, expires_on)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(eid)
    .bind(customer_id)
    .bind(package.id)
    .bind(paid)
    .bind(req.payment_method.as_str())
    .bind(expires_on)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        "Sold package '{}' to customer {} for {} (expires {})",
        package.name,
        customer_id,
        paid,
        expires_on
    );

    Ok((StatusCode::CREATED, Json(sold)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(page(None, None), (50, 0));
        assert_eq!(page(Some(1000), Some(-5)), (200, 0));
        assert_eq!(page(Some(0), Some(20)), (1, 20));
    }

    #[test]
    fn duplicate_phone_rewrites_conflicts_only() {
        let e = duplicate_phone(AppError::Conflict("raw".to_string()), "+5511987654321");
        assert!(e.to_string().contains("+5511987654321"));
        let e = duplicate_phone(AppError::BadRequest("x".to_string()), "+55");
        assert!(matches!(e, AppError::BadRequest(_)));
    }
}
