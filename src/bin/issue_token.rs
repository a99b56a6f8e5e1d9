//! Prints a fresh API token for an establishment.
//!
//! Usage: `issue_token <establishment-slug> [label]`
//!
//! Bootstraps back-office access without going through the admin HTTP
//! route. Only the token hash is stored; the printed value cannot be
//! recovered later.

use agenda_api::auth;
use agenda_api::config::Config;
use agenda_api::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let slug = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("Usage: issue_token <establishment-slug> [label]"))?;
    let label = args.next();

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;

    let (establishment_id,) =
        sqlx::query_as::<_, (uuid::Uuid,)>("SELECT id FROM establishments WHERE slug = $1")
            .bind(&slug)
            .fetch_optional(&db.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No establishment with slug '{}'", slug))?;

    let (row, token) = auth::issue_token(&db.pool, establishment_id, label.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!("Token {} issued for '{}'", row.id, slug);
    println!("{}", token);

    Ok(())
}
