//! Seeds an establishment with demo catalog data.
//!
//! Usage: `seed <establishment-slug> [--categories N]`
//!
//! See [`agenda_api::seeding`] for what gets inserted.

use agenda_api::config::Config;
use agenda_api::db::Database;
use agenda_api::seeding;
use agenda_api::validation;

const DEFAULT_CATEGORIES: usize = 3;

#[derive(Debug, PartialEq, Eq)]
struct SeedArgs {
    slug: String,
    categories: usize,
}

fn parse_args(args: &[String]) -> anyhow::Result<SeedArgs> {
    let mut slug = None;
    let mut categories = DEFAULT_CATEGORIES;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--categories" => {
                let raw = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--categories needs a value"))?;
                categories = raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("--categories must be a number, got '{}'", raw))?;
            }
            other if other.starts_with("--") => anyhow::bail!("Unknown option {}", other),
            other if slug.is_none() => slug = Some(other.to_string()),
            other => anyhow::bail!("Unexpected argument {}", other),
        }
    }

    let slug = slug.ok_or_else(|| {
        anyhow::anyhow!("Usage: seed <establishment-slug> [--categories N]")
    })?;
    if !validation::is_valid_slug(&slug) {
        anyhow::bail!("Invalid slug '{}'", slug);
    }
    if categories == 0 {
        anyhow::bail!("--categories must be at least 1");
    }

    Ok(SeedArgs { slug, categories })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args)?;

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url).await?;
    if config.run_migrations {
        db.migrate().await?;
    }

    let report = seeding::seed_establishment(&db.pool, &args.slug, args.categories).await?;

    println!(
        "establishment={} categories={} services={} employees=1",
        report.establishment_id, report.categories, report.services
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_slug_and_count() {
        assert_eq!(
            parse_args(&args(&["salao-da-ana", "--categories", "5"])).unwrap(),
            SeedArgs {
                slug: "salao-da-ana".to_string(),
                categories: 5
            }
        );
        assert_eq!(parse_args(&args(&["salao"])).unwrap().categories, DEFAULT_CATEGORIES);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["Bad Slug"])).is_err());
        assert!(parse_args(&args(&["salao", "--categories"])).is_err());
        assert!(parse_args(&args(&["salao", "--categories", "x"])).is_err());
        assert!(parse_args(&args(&["salao", "--categories", "0"])).is_err());
        assert!(parse_args(&args(&["salao", "--verbose"])).is_err());
    }
}
