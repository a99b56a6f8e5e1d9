use chrono::{Duration, NaiveDate, NaiveTime};
use std::env;
use uuid::Uuid;

use agenda_api::api_models::CheckinRequest;
use agenda_api::db::Database;
use agenda_api::db_storage::{loyalty_balance, AppointmentStorage, NewBooking};
use agenda_api::errors::AppError;
use agenda_api::lifecycle::CancelActor;
use agenda_api::models::{Establishment, PaymentMethod};
use agenda_api::scheduling::SlotPolicy;
use agenda_api::seeding::seed_establishment;
use agenda_api::staff_handler::{ensure_free_seat, lock_establishment};

/// Integration tests for appointment storage against a real Postgres.
/// Marked ignored so they never run against production by accident; set
/// TEST_DATABASE_URL to run. Each test creates and removes its own
/// establishment.
struct Fixture {
    db: Database,
    establishment: Establishment,
    service_id: Uuid,
    employee_id: Uuid,
    customer_id: Uuid,
    phone: String,
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

async fn database() -> anyhow::Result<Database> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    Ok(db)
}

async fn fixture() -> anyhow::Result<Fixture> {
    let db = database().await?;

    let slug = format!("test-{}", Uuid::new_v4().simple());
    let establishment = sqlx::query_as::<_, Establishment>(
        r#"
        INSERT INTO establishments (id, name, slug, utc_offset_minutes, slot_interval_minutes)
        VALUES ($1, 'Test Studio', $2, 0, 30)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&slug)
    .fetch_one(&db.pool)
    .await?;

    let (service_id,) = sqlx::query_as::<_, (Uuid,)>(
        r#"
        INSERT INTO services (id, establishment_id, name, duration_minutes, price_cents)
        VALUES ($1, $2, 'Haircut', 60, 5000)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .fetch_one(&db.pool)
    .await?;

    let (employee_id,) = sqlx::query_as::<_, (Uuid,)>(
        "INSERT INTO employees (id, establishment_id, name) VALUES ($1, $2, 'Ana') RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .fetch_one(&db.pool)
    .await?;

    sqlx::query("INSERT INTO employee_services (employee_id, service_id) VALUES ($1, $2)")
        .bind(employee_id)
        .bind(service_id)
        .execute(&db.pool)
        .await?;

    // Every day of the week so tests do not depend on the calendar
    for weekday in 0..=6_i16 {
        sqlx::query(
            r#"
            INSERT INTO working_hours (id, employee_id, weekday, start_time, end_time)
            VALUES ($1, $2, $3, '09:00', '18:00')
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(employee_id)
        .bind(weekday)
        .execute(&db.pool)
        .await?;
    }

    let phone = "+5511987654321".to_string();
    let (customer_id,) = sqlx::query_as::<_, (Uuid,)>(
        r#"
        INSERT INTO customers (id, establishment_id, name, phone)
        VALUES ($1, $2, 'Maria', $3)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(establishment.id)
    .bind(&phone)
    .fetch_one(&db.pool)
    .await?;

    Ok(Fixture {
        db,
        establishment,
        service_id,
        employee_id,
        customer_id,
        phone,
    })
}

impl Fixture {
    fn booking(&self, date: NaiveDate, start: NaiveTime) -> NewBooking {
        NewBooking {
            customer_id: self.customer_id,
            employee_id: self.employee_id,
            service_id: self.service_id,
            date,
            start,
            price_cents: None,
            customer_service_package_id: None,
            notes: None,
            policy: SlotPolicy::BackOffice,
        }
    }

    /// Sells the customer a package holding `sessions` of the fixture service.
    async fn package(&self, sessions: i32, expires_on: NaiveDate) -> anyhow::Result<Uuid> {
        let (package_id,) = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO packages (id, establishment_id, name, price_cents, validity_days)
            VALUES ($1, $2, 'Haircut pack', 9000, 30)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.establishment.id)
        .fetch_one(&self.db.pool)
        .await?;

        sqlx::query(
            "INSERT INTO package_items (id, package_id, service_id, quantity) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(package_id)
        .bind(self.service_id)
        .bind(sessions)
        .execute(&self.db.pool)
        .await?;

        let (customer_package_id,) = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO customer_service_packages
                (id, establishment_id, customer_id, package_id, paid_amount_cents, payment_method, expires_on)
            VALUES ($1, $2, $3, $4, 9000, 'pix', $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.establishment.id)
        .bind(self.customer_id)
        .bind(package_id)
        .bind(expires_on)
        .fetch_one(&self.db.pool)
        .await?;

        Ok(customer_package_id)
    }

    async fn usages(&self, customer_package_id: Uuid) -> anyhow::Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM customer_service_package_usages WHERE customer_service_package_id = $1",
        )
        .bind(customer_package_id)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(count)
    }

    async fn cleanup(self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM establishments WHERE id = $1")
            .bind(self.establishment.id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }
}

#[tokio::test]
#[ignore]
async fn overlapping_booking_is_a_conflict() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let date = now.date() + Duration::days(7);

    let first = storage
        .book(&fx.establishment, fx.booking(date, t(10, 0)), now)
        .await?;
    assert_eq!(first.end_time, t(11, 0));
    assert_eq!(first.price.cents(), 5000);

    let overlapping = storage
        .book(&fx.establishment, fx.booking(date, t(10, 30)), now)
        .await;
    assert!(matches!(overlapping, Err(AppError::Conflict(_))));

    // Half-open intervals: back-to-back is fine
    storage
        .book(&fx.establishment, fx.booking(date, t(11, 0)), now)
        .await?;

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn customer_cancellation_rules() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();

    let upcoming = storage
        .book(
            &fx.establishment,
            fx.booking(now.date() + Duration::days(3), t(14, 0)),
            now,
        )
        .await?;

    let stranger = storage
        .cancel(
            &fx.establishment,
            upcoming.id,
            CancelActor::Customer {
                phone: "+5521999998888".to_string(),
            },
            now,
        )
        .await;
    assert!(matches!(stranger, Err(AppError::NotFound(_))));

    let canceled = storage
        .cancel(
            &fx.establishment,
            upcoming.id,
            CancelActor::Customer {
                phone: fx.phone.clone(),
            },
            now,
        )
        .await?;
    assert_eq!(canceled.status, "canceled");
    assert!(canceled.canceled_at.is_some());

    // The freed slot can be booked again
    storage
        .book(
            &fx.establishment,
            fx.booking(now.date() + Duration::days(3), t(14, 0)),
            now,
        )
        .await?;

    let past = storage
        .book(
            &fx.establishment,
            fx.booking(now.date() - Duration::days(2), t(10, 0)),
            now,
        )
        .await?;
    let too_late = storage
        .cancel(
            &fx.establishment,
            past.id,
            CancelActor::Customer {
                phone: fx.phone.clone(),
            },
            now,
        )
        .await;
    assert!(matches!(too_late, Err(AppError::BadRequest(_))));

    // Staff may still record a no-show
    let no_show = storage
        .cancel(
            &fx.establishment,
            past.id,
            CancelActor::Staff {
                reason: Some("No-show".to_string()),
            },
            now,
        )
        .await?;
    assert_eq!(no_show.notes.as_deref(), Some("Canceled: No-show"));

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn checkin_completes_and_accrues_loyalty() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let today = now.date();

    let (program_id,) = sqlx::query_as::<_, (Uuid,)>(
        r#"
        INSERT INTO loyalty_programs (id, establishment_id, name, points_required, reward_service_id)
        VALUES ($1, $2, 'Club', 2, $3)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(fx.establishment.id)
    .bind(fx.service_id)
    .fetch_one(&fx.db.pool)
    .await?;
    sqlx::query(
        "INSERT INTO loyalty_point_rules (id, loyalty_program_id, service_id, points) VALUES ($1, $2, $3, 1)",
    )
    .bind(Uuid::new_v4())
    .bind(program_id)
    .bind(fx.service_id)
    .execute(&fx.db.pool)
    .await?;

    let yesterday = today - Duration::days(1);
    let first = storage
        .book(&fx.establishment, fx.booking(yesterday, t(9, 0)), now)
        .await?;
    let response = storage
        .checkin(
            &fx.establishment,
            first.id,
            &CheckinRequest {
                payment_method: Some(PaymentMethod::Cash),
                ..Default::default()
            },
            today,
        )
        .await?;
    assert_eq!(response.appointment.status, "completed");
    assert_eq!(response.appointment.paid_amount.map(|m| m.cents()), Some(5000));
    assert_eq!(response.loyalty_points, 1);
    assert!(!response.package_session_consumed);

    // A completed appointment cannot be checked in twice
    let again = storage
        .checkin(&fx.establishment, first.id, &CheckinRequest::default(), today)
        .await;
    assert!(matches!(again, Err(AppError::BadRequest(_))));

    // One point is not enough for the two-point reward
    let second = storage
        .book(&fx.establishment, fx.booking(yesterday, t(11, 0)), now)
        .await?;
    let redeem = storage
        .checkin(
            &fx.establishment,
            second.id,
            &CheckinRequest {
                redeem_loyalty: true,
                ..Default::default()
            },
            today,
        )
        .await;
    assert!(matches!(redeem, Err(AppError::BadRequest(_))));

    // Future appointments cannot be checked in yet
    let tomorrow = storage
        .book(
            &fx.establishment,
            fx.booking(today + Duration::days(1), t(9, 0)),
            now,
        )
        .await?;
    let early = storage
        .checkin(&fx.establishment, tomorrow.id, &CheckinRequest::default(), today)
        .await;
    assert!(matches!(early, Err(AppError::BadRequest(_))));

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn concurrent_overlapping_bookings_admit_exactly_one() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let date = now.date() + Duration::days(5);

    let (first, second) = tokio::join!(
        storage.book(&fx.establishment, fx.booking(date, t(10, 0)), now),
        storage.book(&fx.establishment, fx.booking(date, t(10, 30)), now),
    );
    let outcomes = [first, second];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(AppError::Conflict(_))))
            .count(),
        1
    );

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn package_session_is_reserved_released_and_consumed() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let today = now.date();
    let yesterday = today - Duration::days(1);
    let pack = fx.package(1, today + Duration::days(30)).await?;

    let with_pack = |date: NaiveDate, start: NaiveTime| NewBooking {
        customer_service_package_id: Some(pack),
        ..fx.booking(date, start)
    };

    // Booking reserves the only session
    let reserved = storage
        .book(&fx.establishment, with_pack(yesterday, t(9, 0)), now)
        .await?;
    assert_eq!(reserved.customer_service_package_id, Some(pack));
    assert_eq!(fx.usages(pack).await?, 1);

    let exhausted = storage
        .book(&fx.establishment, with_pack(today + Duration::days(2), t(9, 0)), now)
        .await;
    assert!(matches!(exhausted, Err(AppError::BadRequest(_))));

    // Canceling gives it back
    storage
        .cancel(
            &fx.establishment,
            reserved.id,
            CancelActor::Staff { reason: None },
            now,
        )
        .await?;
    assert_eq!(fx.usages(pack).await?, 0);

    // Rebook and check in: the reserved session pays for the visit
    let rebooked = storage
        .book(&fx.establishment, with_pack(yesterday, t(11, 0)), now)
        .await?;
    assert_eq!(fx.usages(pack).await?, 1);
    let done = storage
        .checkin(&fx.establishment, rebooked.id, &CheckinRequest::default(), today)
        .await?;
    assert!(done.package_session_consumed);
    assert_eq!(done.appointment.payment_method.as_deref(), Some("package"));
    assert_eq!(done.appointment.paid_amount.map(|m| m.cents()), Some(0));
    assert_eq!(fx.usages(pack).await?, 1);

    // Nothing left to consume at check-in either
    let unpaid = storage
        .book(&fx.establishment, fx.booking(yesterday, t(14, 0)), now)
        .await?;
    let no_session = storage
        .checkin(
            &fx.establishment,
            unpaid.id,
            &CheckinRequest {
                customer_service_package_id: Some(pack),
                ..Default::default()
            },
            today,
        )
        .await;
    assert!(matches!(no_session, Err(AppError::BadRequest(_))));

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn package_session_can_be_consumed_at_checkin() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let today = now.date();
    let pack = fx.package(2, today + Duration::days(30)).await?;

    let walk_in = storage
        .book(&fx.establishment, fx.booking(today - Duration::days(1), t(10, 0)), now)
        .await?;
    assert_eq!(fx.usages(pack).await?, 0);

    let done = storage
        .checkin(
            &fx.establishment,
            walk_in.id,
            &CheckinRequest {
                customer_service_package_id: Some(pack),
                ..Default::default()
            },
            today,
        )
        .await?;
    assert!(done.package_session_consumed);
    assert_eq!(done.appointment.customer_service_package_id, Some(pack));
    assert_eq!(fx.usages(pack).await?, 1);

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn expired_package_is_rejected() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let today = now.date();
    let pack = fx.package(5, today).await?;

    let after_expiry = storage
        .book(
            &fx.establishment,
            NewBooking {
                customer_service_package_id: Some(pack),
                ..fx.booking(today + Duration::days(3), t(9, 0))
            },
            now,
        )
        .await;
    assert!(matches!(after_expiry, Err(AppError::BadRequest(_))));
    assert_eq!(fx.usages(pack).await?, 0);

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn loyalty_reward_is_redeemed_with_points() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let storage = AppointmentStorage::new(fx.db.pool.clone());
    let now = fx.establishment.local_now();
    let today = now.date();
    let yesterday = today - Duration::days(1);

    let (program_id,) = sqlx::query_as::<_, (Uuid,)>(
        r#"
        INSERT INTO loyalty_programs (id, establishment_id, name, points_required, reward_service_id)
        VALUES ($1, $2, 'Club', 2, $3)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(fx.establishment.id)
    .bind(fx.service_id)
    .fetch_one(&fx.db.pool)
    .await?;
    sqlx::query(
        r#"
        INSERT INTO customer_loyalty_points (id, customer_id, loyalty_program_id, points, description)
        VALUES ($1, $2, $3, 3, 'Migrated balance')
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(fx.customer_id)
    .bind(program_id)
    .execute(&fx.db.pool)
    .await?;

    let reward = storage
        .book(&fx.establishment, fx.booking(yesterday, t(9, 0)), now)
        .await?;
    let redeemed = storage
        .checkin(
            &fx.establishment,
            reward.id,
            &CheckinRequest {
                redeem_loyalty: true,
                ..Default::default()
            },
            today,
        )
        .await?;
    assert_eq!(redeemed.loyalty_points, -2);
    assert_eq!(redeemed.appointment.payment_method.as_deref(), Some("loyalty"));
    assert_eq!(redeemed.appointment.paid_amount.map(|m| m.cents()), Some(0));

    let mut conn = fx.db.pool.acquire().await?;
    assert_eq!(loyalty_balance(&mut conn, fx.customer_id, program_id).await?, 1);
    drop(conn);

    // One point left, two required
    let another = storage
        .book(&fx.establishment, fx.booking(yesterday, t(11, 0)), now)
        .await?;
    let short = storage
        .checkin(
            &fx.establishment,
            another.id,
            &CheckinRequest {
                redeem_loyalty: true,
                ..Default::default()
            },
            today,
        )
        .await;
    assert!(matches!(short, Err(AppError::BadRequest(_))));

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn employee_seats_are_claimed_one_at_a_time() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let establishment_id = fx.establishment.id;

    // Ana already holds the only seat
    let mut tx = fx.db.pool.begin().await?;
    lock_establishment(&mut tx, establishment_id).await?;
    let full = ensure_free_seat(&mut tx, establishment_id, Some(1)).await;
    assert!(matches!(full, Err(AppError::Forbidden(_))));
    tx.rollback().await?;

    // Two seats: the first transaction takes the last one while the second waits on the lock
    let mut first = fx.db.pool.begin().await?;
    lock_establishment(&mut first, establishment_id).await?;
    ensure_free_seat(&mut first, establishment_id, Some(2)).await?;
    sqlx::query("INSERT INTO employees (id, establishment_id, name) VALUES ($1, $2, 'Bia')")
        .bind(Uuid::new_v4())
        .bind(establishment_id)
        .execute(&mut *first)
        .await?;

    let pool = fx.db.pool.clone();
    let second = async move {
        let mut tx = pool.begin().await?;
        lock_establishment(&mut tx, establishment_id).await?;
        ensure_free_seat(&mut tx, establishment_id, Some(2)).await
    };
    let release = async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        first.commit().await
    };
    let (second, released) = tokio::join!(second, release);
    released?;
    assert!(matches!(second, Err(AppError::Forbidden(_))));

    fx.cleanup().await
}

#[tokio::test]
#[ignore]
async fn seeding_inserts_the_requested_catalog() -> anyhow::Result<()> {
    let db = database().await?;
    let slug = format!("seed-{}", Uuid::new_v4().simple());

    let report = seed_establishment(&db.pool, &slug, 4).await?;
    assert_eq!(report.categories, 4);
    assert_eq!(report.services, 4);

    let count = |table: &'static str| {
        let pool = db.pool.clone();
        let establishment_id = report.establishment_id;
        async move {
            sqlx::query_as::<_, (i64,)>(&format!(
                "SELECT COUNT(*) FROM {} WHERE establishment_id = $1",
                table
            ))
            .bind(establishment_id)
            .fetch_one(&pool)
            .await
            .map(|(n,)| n)
        }
    };
    assert_eq!(count("categories").await?, 4);
    assert_eq!(count("services").await?, 4);
    assert_eq!(count("employees").await?, 1);

    let (linked,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM employee_services WHERE employee_id = $1",
    )
    .bind(report.employee_id)
    .fetch_one(&db.pool)
    .await?;
    assert_eq!(linked, 4);

    // A second run reuses the establishment and adds fresh categories
    let again = seed_establishment(&db.pool, &slug, 2).await?;
    assert_eq!(again.establishment_id, report.establishment_id);
    assert_eq!(count("categories").await?, 6);

    sqlx::query("DELETE FROM establishments WHERE id = $1")
        .bind(report.establishment_id)
        .execute(&db.pool)
        .await?;
    Ok(())
}
