//! Back-office handlers for prepaid service packages and the loyalty program.

use crate::api_models::*;
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::handlers::{load_establishment, AppState};
use crate::models::*;
use crate::validation;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

// ============ Packages ============

fn validate_items(items: &[PackageItemRequest]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::BadRequest(
            "A package needs at least one item".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for item in items {
        if item.quantity <= 0 {
            return Err(AppError::BadRequest(format!(
                "Quantity for service {} must be positive",
                item.service_id
            )));
        }
        if !seen.insert(item.service_id) {
            return Err(AppError::BadRequest(format!(
                "Service {} appears more than once",
                item.service_id
            )));
        }
    }
    Ok(())
}

fn validate_validity(days: i32) -> Result<(), AppError> {
    if days <= 0 {
        return Err(AppError::BadRequest(
            "validity_days must be positive".to_string(),
        ));
    }
    Ok(())
}

async fn replace_items(
    conn: &mut PgConnection,
    establishment_id: Uuid,
    package_id: Uuid,
    items: &[PackageItemRequest],
) -> Result<Vec<PackageItem>, AppError> {
    let service_ids: Vec<Uuid> = items.iter().map(|i| i.service_id).collect();
    let (found,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM services WHERE establishment_id = $1 AND id = ANY($2)",
    )
    .bind(establishment_id)
    .bind(&service_ids)
    .fetch_one(&mut *conn)
    .await?;
    if found != service_ids.len() as i64 {
        return Err(AppError::BadRequest(
            "One or more services do not belong to this establishment".to_string(),
        ));
    }

    sqlx::query("DELETE FROM package_items WHERE package_id = $1")
        .bind(package_id)
        .execute(&mut *conn)
        .await?;

    let mut saved = Vec::with_capacity(items.len());
    for item in items {
        let row = sqlx::query_as::<_, PackageItem>(
            r#"
            INSERT INTO package_items (id, package_id, service_id, quantity)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(package_id)
        .bind(item.service_id)
        .bind(item.quantity)
        .fetch_one(&mut *conn)
        .await?;
        saved.push(row);
    }
    Ok(saved)
}

async fn items_of(db: &PgPool, package_id: Uuid) -> Result<Vec<PackageItem>, AppError> {
    let items = sqlx::query_as::<_, PackageItem>(
        "SELECT * FROM package_items WHERE package_id = $1 ORDER BY service_id",
    )
    .bind(package_id)
    .fetch_all(db)
    .await?;
    Ok(items)
}

/// GET /api/v1/establishments/:eid/packages
pub async fn list_packages(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<Vec<PackageWithItems>>, AppError> {
    tracing::info!("GET /establishments/{}/packages", eid);
    auth.require_establishment(eid)?;

    let packages = sqlx::query_as::<_, Package>(
        "SELECT * FROM packages WHERE establishment_id = $1 ORDER BY active DESC, name",
    )
    .bind(eid)
    .fetch_all(&state.db)
    .await?;

    let mut result = Vec::with_capacity(packages.len());
    for package in packages {
        let items = items_of(&state.db, package.id).await?;
        result.push(PackageWithItems { package, items });
    }
    Ok(Json(result))
}

/// POST /api/v1/establishments/:eid/packages
pub async fn create_package(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<CreatePackageRequest>,
) -> Result<(StatusCode, Json<PackageWithItems>), AppError> {
    tracing::info!("POST /establishments/{}/packages - {}", eid, req.name);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let name = validation::require_name("name", &req.name)?;
    validate_validity(req.validity_days)?;
    validate_items(&req.items)?;

    let mut tx = state.db.begin().await?;

    let package = sqlx::query_as::<_, Package>(
        r#"
        INSERT INTO packages (id, establishment_id, name, price_cents, validity_days)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(&name)
    .bind(req.price)
    .bind(req.validity_days)
    .fetch_one(&mut *tx)
    .await?;

    let items = replace_items(&mut tx, establishment.id, package.id, &req.items).await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(PackageWithItems { package, items })))
}

/// GET /api/v1/establishments/:eid/packages/:package_id
pub async fn get_package(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, package_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<PackageWithItems>, AppError> {
    tracing::info!("GET /establishments/{}/packages/{}", eid, package_id);
    auth.require_establishment(eid)?;

    let package = sqlx::query_as::<_, Package>(
        "SELECT * FROM packages WHERE id = $1 AND establishment_id = $2",
    )
    .bind(package_id)
    .bind(eid)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Package {} not found", package_id)))?;

    let items = items_of(&state.db, package.id).await?;
    Ok(Json(PackageWithItems { package, items }))
}

/// PUT /api/v1/establishments/:eid/packages/:package_id
///
/// Changes apply to future sales. Packages already sold keep their expiry;
/// replacing items changes what their remaining sessions cover.
pub async fn update_package(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, package_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdatePackageRequest>,
) -> Result<Json<PackageWithItems>, AppError> {
    tracing::info!("PUT /establishments/{}/packages/{}", eid, package_id);
    auth.require_establishment(eid)?;

    let name = req
        .name
        .as_deref()
        .map(|n| validation::require_name("name", n))
        .transpose()?;
    if let Some(days) = req.validity_days {
        validate_validity(days)?;
    }
    if let Some(items) = &req.items {
        validate_items(items)?;
    }

    let mut tx = state.db.begin().await?;

    let package = sqlx::query_as::<_, Package>(
        r#"
        UPDATE packages SET
            name = COALESCE($3, name),
            price_cents = COALESCE($4, price_cents),
            validity_days = COALESCE($5, validity_days),
            active = COALESCE($6, active),
            updated_at = now()
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(package_id)
    .bind(eid)
    .bind(name)
    .bind(req.price)
    .bind(req.validity_days)
    .bind(req.active)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Package {} not found", package_id)))?;

    if let Some(items) = &req.items {
        replace_items(&mut tx, eid, package.id, items).await?;
    }

    tx.commit().await?;

    let items = items_of(&state.db, package.id).await?;
    Ok(Json(PackageWithItems { package, items }))
}

/// DELETE /api/v1/establishments/:eid/packages/:package_id
///
/// Deactivates the package so it can no longer be sold.
pub async fn delete_package(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, package_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Package>, AppError> {
    tracing::info!("DELETE /establishments/{}/packages/{}", eid, package_id);
    auth.require_establishment(eid)?;

    let package = sqlx::query_as::<_, Package>(
        r#"
        UPDATE packages SET active = FALSE, updated_at = now()
        WHERE id = $1 AND establishment_id = $2
        RETURNING *
        "#,
    )
    .bind(package_id)
    .bind(eid)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Package {} not found", package_id)))?;

    Ok(Json(package))
}

// ============ Loyalty ============

async fn program_of(db: &PgPool, establishment_id: Uuid) -> Result<LoyaltyProgram, AppError> {
    sqlx::query_as::<_, LoyaltyProgram>("SELECT * FROM loyalty_programs WHERE establishment_id = $1")
        .bind(establishment_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Loyalty program not configured".to_string()))
}

async fn rules_of(db: &PgPool, program_id: Uuid) -> Result<Vec<LoyaltyPointRule>, AppError> {
    let rules = sqlx::query_as::<_, LoyaltyPointRule>(
        "SELECT * FROM loyalty_point_rules WHERE loyalty_program_id = $1 ORDER BY service_id",
    )
    .bind(program_id)
    .fetch_all(db)
    .await?;
    Ok(rules)
}

/// GET /api/v1/establishments/:eid/loyalty
pub async fn get_loyalty_program(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<LoyaltyProgramWithRules>, AppError> {
    tracing::info!("GET /establishments/{}/loyalty", eid);
    auth.require_establishment(eid)?;

    let program = program_of(&state.db, eid).await?;
    let rules = rules_of(&state.db, program.id).await?;
    Ok(Json(LoyaltyProgramWithRules { program, rules }))
}

/// PUT /api/v1/establishments/:eid/loyalty
///
/// Creates or replaces the establishment's single loyalty program. The
/// ledger and rules survive a replacement.
pub async fn put_loyalty_program(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<LoyaltyProgramRequest>,
) -> Result<Json<LoyaltyProgramWithRules>, AppError> {
    tracing::info!("PUT /establishments/{}/loyalty", eid);
    let establishment = load_establishment(&state, &auth, eid).await?;

    let name = validation::require_name("name", &req.name)?;
    if req.points_required <= 0 {
        return Err(AppError::BadRequest(
            "points_required must be positive".to_string(),
        ));
    }
    crate::db_storage::service_of(&state.db, establishment.id, req.reward_service_id).await?;

    let program = sqlx::query_as::<_, LoyaltyProgram>(
        r#"
        INSERT INTO loyalty_programs (id, establishment_id, name, points_required, reward_service_id, active)
        VALUES ($1, $2, $3, $4, $5, COALESCE($6, TRUE))
        ON CONFLICT (establishment_id) DO UPDATE SET
            name = EXCLUDED.name,
            points_required = EXCLUDED.points_required,
            reward_service_id = EXCLUDED.reward_service_id,
            active = COALESCE($6, loyalty_programs.active),
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(&name)
    .bind(req.points_required)
    .bind(req.reward_service_id)
    .bind(req.active)
    .fetch_one(&state.db)
    .await?;

    let rules = rules_of(&state.db, program.id).await?;
    Ok(Json(LoyaltyProgramWithRules { program, rules }))
}

/// GET /api/v1/establishments/:eid/loyalty/rules
pub async fn list_loyalty_rules(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
) -> Result<Json<Vec<LoyaltyPointRule>>, AppError> {
    tracing::info!("GET /establishments/{}/loyalty/rules", eid);
    auth.require_establishment(eid)?;

    let program = program_of(&state.db, eid).await?;
    Ok(Json(rules_of(&state.db, program.id).await?))
}

/// PUT /api/v1/establishments/:eid/loyalty/rules
///
/// Sets the points a completed service earns.
pub async fn put_loyalty_rule(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(eid): Path<Uuid>,
    Json(req): Json<LoyaltyRuleRequest>,
) -> Result<Json<LoyaltyPointRule>, AppError> {
    tracing::info!(
        "PUT /establishments/{}/loyalty/rules - service {} = {} points",
        eid,
        req.service_id,
        req.points
    );
    auth.require_establishment(eid)?;

    if req.points <= 0 {
        return Err(AppError::BadRequest("points must be positive".to_string()));
    }
    let program = program_of(&state.db, eid).await?;
    crate::db_storage::service_of(&state.db, eid, req.service_id).await?;

    let rule = sqlx::query_as::<_, LoyaltyPointRule>(
        r#"
        INSERT INTO loyalty_point_rules (id, loyalty_program_id, service_id, points)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (loyalty_program_id, service_id) DO UPDATE SET points = EXCLUDED.points
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(program.id)
    .bind(req.service_id)
    .bind(req.points)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(rule))
}

/// DELETE /api/v1/establishments/:eid/loyalty/rules/:service_id
pub async fn delete_loyalty_rule(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((eid, service_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    tracing::info!("DELETE /establishments/{}/loyalty/rules/{}", eid, service_id);
    auth.require_establishment(eid)?;

    let program = program_of(&state.db, eid).await?;
    let deleted = sqlx::query(
        "DELETE FROM loyalty_point_rules WHERE loyalty_program_id = $1 AND service_id = $2",
    )
    .bind(program.id)
    .bind(service_id)
    .execute(&state.db)
    .await?
    .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!(
            "No loyalty rule for service {}",
            service_id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}
