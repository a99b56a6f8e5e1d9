use crate::api_models::*;
use crate::auth::{self, AuthContext};
use crate::availability::MAX_DURATION_MINUTES;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::validation;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use moka::future::Cache;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Default subscription period when none is given.
const DEFAULT_PERIOD_DAYS: i32 = 30;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Storefront lookups by slug. Invalidated when an establishment changes.
    pub establishment_cache: Cache<String, Establishment>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        let establishment_cache = Cache::builder()
            .time_to_live(std::time::Duration::from_secs(
                config.storefront_cache_ttl_secs,
            ))
            .max_capacity(10_000)
            .build();

        Self {
            db,
            config,
            establishment_cache,
        }
    }
}

/// Loads an establishment after checking the caller may act on it.
pub async fn load_establishment(
    state: &AppState,
    auth: &AuthContext,
    establishment_id: Uuid,
) -> Result<Establishment, AppError> {
    auth.require_establishment(establishment_id)?;

    sqlx::query_as::<_, Establishment>("SELECT * FROM establishments WHERE id = $1")
        .bind(establishment_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Establishment {} not found", establishment_id))
        })
}

/// Health check endpoint.
///
/// Reports whether the database answers. Responds 503 when it does not.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "service": "agenda-api",
            "version": env!("CARGO_PKG_VERSION"),
            "database": database,
        })),
    )
}

// ============ Establishments ============

fn validate_settings(
    utc_offset_minutes: Option<i32>,
    slot_interval_minutes: Option<i32>,
    booking_window_days: Option<i32>,
) -> Result<(), AppError> {
    if let Some(offset) = utc_offset_minutes {
        if !(-720..=840).contains(&offset) {
            return Err(AppError::BadRequest(
                "utc_offset_minutes must be between -720 and 840".to_string(),
            ));
        }
    }
    if let Some(step) = slot_interval_minutes {
        if !(5..=240).contains(&step) {
            return Err(AppError::BadRequest(
                "slot_interval_minutes must be between 5 and 240".to_string(),
            ));
        }
    }
    if let Some(days) = booking_window_days {
        if !(1..=365).contains(&days) {
            return Err(AppError::BadRequest(
                "booking_window_days must be between 1 and 365".to_string(),
            ));
        }
    }
    Ok(())
}

/// POST /api/v1/establishments
///
/// Creates a tenant. Platform admin only.
pub async fn create_establishment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<CreateEstablishmentRequest>,
) -> Result<(StatusCode, Json<Establishment>), AppError> {
    auth.require_admin()?;
    tracing::info!("POST /establishments - slug: {}", req.slug);

    let name = validation::require_name("name", &req.name)?;
    let slug = req.slug.trim().to_lowercase();
    if !validation::is_valid_slug(&slug) {
        return Err(AppError::BadRequest(format!(
            "Invalid slug '{}': use 3-63 lowercase letters, digits and hyphens",
            req.slug
        )));
    }
    validate_settings(
        req.utc_offset_minutes,
        req.slot_interval_minutes,
        req.booking_window_days,
    )?;
    let email = validation::normalize_email(req.email.as_deref())?;
    let phone = req
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;

    let establishment = sqlx::query_as::<_, Establishment>(
        r#"
        INSERT INTO establishments (
            id, name, slug, phone, email, address,
            utc_offset_minutes, slot_interval_minutes, booking_window_days
        )
        VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, -180), COALESCE($8, 15), COALESCE($9, 60))
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&name)
    .bind(&slug)
    .bind(phone)
    .bind(email)
    .bind(req.address.as_deref())
    .bind(req.utc_offset_minutes)
    .bind(req.slot_interval_minutes)
    .bind(req.booking_window_days)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Slug '{}' is already taken", slug)),
        other => other,
    })?;

    tracing::info!("Created establishment {} ({})", establishment.id, slug);

    Ok((StatusCode::CREATED, Json(establishment)))
}

/// GET /api/v1/establishments
pub async fn list_establishments(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<Establishment>>, AppError> {
    auth.require_admin()?;
    tracing::info!("GET /establishments");

    let establishments =
        sqlx::query_as::<_, Establishment>("SELECT * FROM establishments ORDER BY name")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(establishments))
}

/// GET /api/v1/establishments/:eid
pub async fn get_establishment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<Establishment>, AppError> {
    tracing::info!("GET /establishments/{}", eid);
    Ok(Json(load_establishment(&state, &auth, eid).await?))
}

/// PUT /api/v1/establishments/:eid
///
/// Partial update. The slug is immutable so storefront links stay valid.
pub async fn update_establishment(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<UpdateEstablishmentRequest>,
) -> Result<Json<Establishment>, AppError> {
    tracing::info!("PUT /establishments/{}", eid);
    let current = load_establishment(&state, &auth, eid).await?;

    let name = req
        .name
        .as_deref()
        .map(|n| validation::require_name("name", n))
        .transpose()?;
    validate_settings(
        req.utc_offset_minutes,
        req.slot_interval_minutes,
        req.booking_window_days,
    )?;
    let email = validation::normalize_email(req.email.as_deref())?;
    let phone = req
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;

    let updated = sqlx::query_as::<_, Establishment>(
        r#"
        UPDATE establishments SET
            name = COALESCE($2, name),
            phone = COALESCE($3, phone),
            email = COALESCE($4, email),
            address = COALESCE($5, address),
            utc_offset_minutes = COALESCE($6, utc_offset_minutes),
            slot_interval_minutes = COALESCE($7, slot_interval_minutes),
            booking_window_days = COALESCE($8, booking_window_days),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(eid)
    .bind(name)
    .bind(phone)
    .bind(email)
    .bind(req.address.as_deref())
    .bind(req.utc_offset_minutes)
    .bind(req.slot_interval_minutes)
    .bind(req.booking_window_days)
    .fetch_one(&state.db)
    .await?;

    state.establishment_cache.invalidate(&current.slug).await;

    Ok(Json(updated))
}

// ============ API Tokens ============

/// POST /api/v1/establishments/:eid/tokens
///
/// Issues a token scoped to the establishment. The plaintext is only
/// returned here.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssuedToken>), AppError> {
    auth.require_admin()?;
    tracing::info!("POST /establishments/{}/tokens", eid);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let (row, token) = auth::issue_token(&state.db, establishment.id, req.label.as_deref()).await?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedToken {
            id: row.id,
            establishment_id: row.establishment_id,
            token,
        }),
    ))
}

/// GET /api/v1/establishments/:eid/tokens
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<Vec<ApiToken>>, AppError> {
    auth.require_admin()?;
    tracing::info!("GET /establishments/{}/tokens", eid);

    let tokens = sqlx::query_as::<_, ApiToken>(
        "SELECT * FROM api_tokens WHERE establishment_id = $1 ORDER BY created_at DESC",
    )
    .bind(eid)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(tokens))
}

/// DELETE /api/v1/establishments/:eid/tokens/:token_id
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, token_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiToken>, AppError> {
    auth.require_admin()?;
    tracing::info!("DELETE /establishments/{}/tokens/{}", eid, token_id);

    let token = sqlx::query_as::<_, ApiToken>(
        r#"
        UPDATE api_tokens SET revoked_at = COALESCE(revoked_at, now())
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(token_id)
    .bind(eid)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Token {} not found", token_id)))?;

    Ok(Json(token))
}

// ============ Plans & Subscriptions ============

/// GET /api/v1/plans
pub async fn list_plans(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> Result<Json<Vec<Plan>>, AppError> {
    tracing::info!("GET /plans");

    let plans = sqlx::query_as::<_, Plan>("SELECT * FROM plans ORDER BY price_cents, name")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(plans))
}

/// POST /api/v1/plans
pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Plan>), AppError> {
    auth.require_admin()?;
    tracing::info!("POST /plans - {}", req.name);

    let name = validation::require_name("name", &req.name)?;
    if req.max_employees <= 0 {
        return Err(AppError::BadRequest(
            "max_employees must be positive".to_string(),
        ));
    }

    let plan = sqlx::query_as::<_, Plan>(
        r#"
        INSERT INTO plans (id, name, price_cents, max_employees)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(req.price)
    .bind(req.max_employees)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(plan)))
}

/// PUT /api/v1/plans/:plan_id
pub async fn update_plan(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(plan_id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<Plan>, AppError> {
    auth.require_admin()?;
    tracing::info!("PUT /plans/{}", plan_id);

    let name = req
        .name
        .as_deref()
        .map(|n| validation::require_name("name", n))
        .transpose()?;
    if matches!(req.max_employees, Some(n) if n <= 0) {
        return Err(AppError::BadRequest(
            "max_employees must be positive".to_string(),
        ));
    }

    let plan = sqlx::query_as::<_, Plan>(
        r#"
        UPDATE plans SET
            name = COALESCE($2, name),
            price_cents = COALESCE($3, price_cents),
            max_employees = COALESCE($4, max_employees),
            active = COALESCE($5, active)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(plan_id)
    .bind(name)
    .bind(req.price)
    .bind(req.max_employees)
    .bind(req.active)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Plan {} not found", plan_id)))?;

    Ok(Json(plan))
}

async fn active_subscription(
    db: &PgPool,
    establishment_id: Uuid,
) -> Result<Option<SubscriptionWithPlan>, AppError> {
    let Some(subscription) = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE establishment_id = $1 AND status = $2",
    )
    .bind(establishment_id)
    .bind(SubscriptionStatus::Active.as_str())
    .fetch_optional(db)
    .await?
    else {
        return Ok(None);
    };

    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
        .bind(subscription.plan_id)
        .fetch_one(db)
        .await?;

    Ok(Some(SubscriptionWithPlan { subscription, plan }))
}

/// Employee limit of the active plan, if the establishment subscribes to one.
pub async fn employee_limit(db: &PgPool, establishment_id: Uuid) -> Result<Option<i32>, AppError> {
    Ok(active_subscription(db, establishment_id)
        .await?
        .map(|s| s.plan.max_employees))
}

/// GET /api/v1/establishments/:eid/subscription
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<SubscriptionWithPlan>, AppError> {
    tracing::info!("GET /establishments/{}/subscription", eid);
    let establishment = load_establishment(&state, &auth, eid).await?;

    active_subscription(&state.db, establishment.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No active subscription".to_string()))
}

/// PUT /api/v1/establishments/:eid/subscription
///
/// Subscribes to a plan, replacing any active subscription.
pub async fn put_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<SubscriptionWithPlan>, AppError> {
    tracing::info!("PUT /establishments/{}/subscription - plan {}", eid, req.plan_id);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let period_days = req.period_days.unwrap_or(DEFAULT_PERIOD_DAYS);
    if period_days <= 0 {
        return Err(AppError::BadRequest(
            "period_days must be positive".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;

    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1 AND active")
        .bind(req.plan_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Plan {} not found", req.plan_id)))?;

    let (employees,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM employees WHERE establishment_id = $1 AND active",
    )
    .bind(establishment.id)
    .fetch_one(&mut *tx)
    .await?;
    if employees > i64::from(plan.max_employees) {
        return Err(AppError::Conflict(format!(
            "Plan '{}' allows {} employees but {} are active",
            plan.name, plan.max_employees, employees
        )));
    }

    sqlx::query(
        r#"
        UPDATE subscriptions SET status = $2, canceled_at = now()
        WHERE establishment_id = $1 AND status = $3
        "#,
    )
    .bind(establishment.id)
    .bind(SubscriptionStatus::Canceled.as_str())
    .bind(SubscriptionStatus::Active.as_str())
    .execute(&mut *tx)
    .await?;

    let period_end = establishment.local_now().date() + Duration::days(i64::from(period_days));
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (id, establishment_id, plan_id, status, current_period_end)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(plan.id)
    .bind(SubscriptionStatus::Active.as_str())
    .bind(period_end)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Establishment {} subscribed to plan '{}' until {}",
        establishment.id,
        plan.name,
        period_end
    );

    Ok(Json(SubscriptionWithPlan { subscription, plan }))
}

/// POST /api/v1/establishments/:eid/subscription/cancel
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    tracing::info!("POST /establishments/{}/subscription/cancel", eid);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions SET status = $2, canceled_at = $3
        WHERE establishment_id = $1 AND status = $4
        RETURNING *
        "#,
    )
    .bind(establishment.id)
    .bind(SubscriptionStatus::Canceled.as_str())
    .bind(Utc::now())
    .bind(SubscriptionStatus::Active.as_str())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("No active subscription".to_string()))?;

    Ok(Json(subscription))
}

// ============ Categories ============

/// GET /api/v1/establishments/:eid/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<Vec<Category>>, AppError> {
    tracing::info!("GET /establishments/{}/categories", eid);
    auth.require_establishment(eid)?;

    let categories = sqlx::query_as::<_, Category>(
        "SELECT * FROM categories WHERE establishment_id = $1 ORDER BY name",
    )
    .bind(eid)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(categories))
}

/// POST /api/v1/establishments/:eid/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    tracing::info!("POST /establishments/{}/categories", eid);
    let establishment = load_establishment(&state, &auth, eid).await?;
    let name = validation::require_name("name", &req.name)?;

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (id, establishment_id, name) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(&name)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(category)))
}

/// PUT /api/v1/establishments/:eid/categories/:category_id
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, category_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<Category>, AppError> {
    tracing::info!("PUT /establishments/{}/categories/{}", eid, category_id);
    auth.require_establishment(eid)?;
    let name = validation::require_name("name", &req.name)?;

    let category = sqlx::query_as::<_, Category>(
        "UPDATE categories SET name = $3 WHERE id = $1 AND establishment_id = $2 RETURNING *",
    )
    .bind(category_id)
    .bind(eid)
    .bind(&name)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Category {} not found", category_id)))?;

    Ok(Json(category))
}

/// DELETE /api/v1/establishments/:eid/categories/:category_id
///
/// Services of the category are kept and become uncategorized.
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, category_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /establishments/{}/categories/{}", eid, category_id);
    auth.require_establishment(eid)?;

    let deleted = sqlx::query("DELETE FROM categories WHERE id = $1 AND establishment_id = $2")
        .bind(category_id)
        .bind(eid)
        .execute(&state.db)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!(
            "Category {} not found",
            category_id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Services ============

fn validate_duration(duration_minutes: i32) -> Result<(), AppError> {
    if !(1..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(AppError::BadRequest(format!(
            "duration_minutes must be between 1 and {}",
            MAX_DURATION_MINUTES
        )));
    }
    Ok(())
}

async fn ensure_category(
    db: &PgPool,
    establishment_id: Uuid,
    category_id: Option<Uuid>,
) -> Result<(), AppError> {
    let Some(category_id) = category_id else {
        return Ok(());
    };
    sqlx::query_as::<_, (Uuid,)>("SELECT id FROM categories WHERE id = $1 AND establishment_id = $2")
        .bind(category_id)
        .bind(establishment_id)
        .fetch_optional(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::BadRequest(format!("Category {} does not exist", category_id)))
}

/// GET /api/v1/establishments/:eid/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Query(params): Query<ServiceListQuery>,
) -> Result<Json<Vec<Service>>, AppError> {
    tracing::info!("GET /establishments/{}/services - {:?}", eid, params);
    auth.require_establishment(eid)?;

    let services = sqlx::query_as::<_, Service>(
        r#"
        SELECT * FROM services
        WHERE establishment_id = $1
          AND ($2::uuid IS NULL OR category_id = $2)
          AND (active OR $3)
        ORDER BY name
        "#,
    )
    .bind(eid)
    .bind(params.category_id)
    .bind(params.include_inactive)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(services))
}

/// POST /api/v1/establishments/:eid/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    tracing::info!("POST /establishments/{}/services - {}", eid, req.name);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let name = validation::require_name("name", &req.name)?;
    validate_duration(req.duration_minutes)?;
    ensure_category(&state.db, establishment.id, req.category_id).await?;

    let service = sqlx::query_as::<_, Service>(
        r#"
        INSERT INTO services (id, establishment_id, category_id, name, description, duration_minutes, price_cents)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(req.category_id)
    .bind(&name)
    .bind(req.description.as_deref())
    .bind(req.duration_minutes)
    .bind(req.price)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(service)))
}

/// GET /api/v1/establishments/:eid/services/:service_id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, service_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Service>, AppError> {
    tracing::info!("GET /establishments/{}/services/{}", eid, service_id);
    auth.require_establishment(eid)?;

    Ok(Json(
        crate::db_storage::service_of(&state.db, eid, service_id).await?,
    ))
}

/// PUT /api/v1/establishments/:eid/services/:service_id
///
/// Duration changes apply to new bookings only.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, service_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateServiceRequest>,
) -> Result<Json<Service>, AppError> {
    tracing::info!("PUT /establishments/{}/services/{}", eid, service_id);
    auth.require_establishment(eid)?;

    let name = req
        .name
        .as_deref()
        .map(|n| validation::require_name("name", n))
        .transpose()?;
    if let Some(duration) = req.duration_minutes {
        validate_duration(duration)?;
    }
    ensure_category(&state.db, eid, req.category_id).await?;

    let service = sqlx::query_as::<_, Service>(
        r#"
        UPDATE services SET
            name = COALESCE($3, name),
            category_id = COALESCE($4, category_id),
            description = COALESCE($5, description),
            duration_minutes = COALESCE($6, duration_minutes),
            price_cents = COALESCE($7, price_cents),
            active = COALESCE($8, active),
            updated_at = now()
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(service_id)
    .bind(eid)
    .bind(name)
    .bind(req.category_id)
    .bind(req.description.as_deref())
    .bind(req.duration_minutes)
    .bind(req.price)
    .bind(req.active)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Service {} not found", service_id)))?;

    Ok(Json(service))
}

/// DELETE /api/v1/establishments/:eid/services/:service_id
///
/// Services referenced by appointments, packages or loyalty programs are
/// deactivated instead of deleted.
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, service_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("DELETE /establishments/{}/services/{}", eid, service_id);
    auth.require_establishment(eid)?;
    crate::db_storage::service_of(&state.db, eid, service_id).await?;

    let (references,) = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT (SELECT COUNT(*) FROM appointments WHERE service_id = $1)
             + (SELECT COUNT(*) FROM package_items WHERE service_id = $1)
             + (SELECT COUNT(*) FROM loyalty_programs WHERE reward_service_id = $1)
        "#,
    )
    .bind(service_id)
    .fetch_one(&state.db)
    .await?;

    if references > 0 {
        sqlx::query("UPDATE services SET active = FALSE, updated_at = now() WHERE id = $1")
            .bind(service_id)
            .execute(&state.db)
            .await?;
        tracing::info!("Service {} is referenced, deactivated instead", service_id);
        return Ok(Json(json!({ "id": service_id, "deleted": false, "deactivated": true })));
    }

    sqlx::query("DELETE FROM services WHERE id = $1")
        .bind(service_id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "id": service_id, "deleted": true, "deactivated": false })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_bounds() {
        assert!(validate_settings(Some(-180), Some(15), Some(60)).is_ok());
        assert!(validate_settings(None, None, None).is_ok());
        assert!(validate_settings(Some(-800), None, None).is_err());
        assert!(validate_settings(None, Some(0), None).is_err());
        assert!(validate_settings(None, None, Some(0)).is_err());
    }

    #[test]
    fn duration_bounds() {
        assert!(validate_duration(30).is_ok());
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(24 * 60).is_err());
        assert!(validate_duration(24 * 60 - 1).is_ok());
    }
}
