//! Demo catalog data for a fresh establishment.
//!
//! Creates the establishment when the slug is unknown, then inserts N
//! categories with one service each and one employee working Monday to
//! Saturday, 09:00-18:00 with a 12:00-13:00 break, linked to every new
//! service. Everything happens in one transaction.

use chrono::NaiveTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Category, Establishment};

const CATEGORY_NAMES: &[&str] = &["Hair", "Nails", "Skin Care", "Massage", "Beard", "Makeup"];

/// What one seeding run inserted.
#[derive(Debug, Clone)]
pub struct SeedReport {
    pub establishment_id: Uuid,
    pub slug: String,
    pub categories: usize,
    pub services: usize,
    pub employee_id: Uuid,
}

/// Name of the `index`-th seeded category, unique within one run.
fn category_name(run: &str, index: usize) -> String {
    let base = CATEGORY_NAMES[index % CATEGORY_NAMES.len()];
    format!("{} {} ({})", base, index / CATEGORY_NAMES.len() + 1, run)
}

fn display_name(slug: &str) -> String {
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn hm(h: u32, m: u32) -> anyhow::Result<NaiveTime> {
    NaiveTime::from_hms_opt(h, m, 0).ok_or_else(|| anyhow::anyhow!("invalid time {}:{}", h, m))
}

pub async fn seed_establishment(
    pool: &PgPool,
    slug: &str,
    categories: usize,
) -> anyhow::Result<SeedReport> {
    if categories == 0 {
        anyhow::bail!("At least one category must be seeded");
    }

    let mut tx = pool.begin().await?;

    let establishment = match sqlx::query_as::<_, Establishment>(
        "SELECT * FROM establishments WHERE slug = $1",
    )
    .bind(slug)
    .fetch_optional(&mut *tx)
    .await?
    {
        Some(existing) => existing,
        None => {
            let created = sqlx::query_as::<_, Establishment>(
                "INSERT INTO establishments (id, name, slug) VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(display_name(slug))
            .bind(slug)
            .fetch_one(&mut *tx)
            .await?;
            tracing::info!("Created establishment '{}' ({})", created.name, created.slug);
            created
        }
    };

    let run = Uuid::new_v4().simple().to_string()[..6].to_string();
    let mut service_ids = Vec::with_capacity(categories);

    for index in 0..categories {
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (id, establishment_id, name) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(establishment.id)
        .bind(category_name(&run, index))
        .fetch_one(&mut *tx)
        .await?;

        let (service_id,) = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO services (id, establishment_id, category_id, name, duration_minutes, price_cents)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(establishment.id)
        .bind(category.id)
        .bind(format!("{} service", category.name))
        .bind(30 + 15 * (index % 4) as i32)
        .bind(5_000_i64 + 1_000 * index as i64)
        .fetch_one(&mut *tx)
        .await?;
        service_ids.push(service_id);
    }

    let (employee_id,) = sqlx::query_as::<_, (Uuid,)>(
        "INSERT INTO employees (id, establishment_id, name) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(format!("Staff {}", run))
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO employee_services (employee_id, service_id) SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(employee_id)
    .bind(&service_ids)
    .execute(&mut *tx)
    .await?;

    // Monday (1) to Saturday (6)
    for weekday in 1..=6_i16 {
        sqlx::query(
            r#"
            INSERT INTO working_hours (id, employee_id, weekday, start_time, end_time, break_start, break_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(employee_id)
        .bind(weekday)
        .bind(hm(9, 0)?)
        .bind(hm(18, 0)?)
        .bind(hm(12, 0)?)
        .bind(hm(13, 0)?)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        "Seeded '{}': {} categories, {} services, 1 employee",
        establishment.slug,
        categories,
        service_ids.len()
    );

    Ok(SeedReport {
        establishment_id: establishment.id,
        slug: establishment.slug,
        categories,
        services: service_ids.len(),
        employee_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_are_unique_within_a_run() {
        let names: std::collections::HashSet<_> =
            (0..20).map(|i| category_name("abc123", i)).collect();
        assert_eq!(names.len(), 20);
    }

    #[test]
    fn display_name_capitalizes_words() {
        assert_eq!(display_name("salao-da-ana"), "Salao Da Ana");
    }
}
