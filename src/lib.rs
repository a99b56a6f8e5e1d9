//! Agenda API Library
//!
//! Multi-tenant appointment booking: establishments manage services,
//! employees, working hours, customers, packages and a loyalty program
//! through a token-protected back-office, while customers book through a
//! public storefront addressed by the establishment slug.
//!
//! # Modules
//!
//! - `api`: HTTP layer (router, handlers, auth, docs).
//! - `core`: Domain logic (availability, lifecycle, money, validation).
//! - `app`: Router construction and middleware.
//! - `auth`: Bearer token authentication.
//! - `availability`: Pure slot computation.
//! - `config`: Configuration management.
//! - `db`: Database connection, pool and migrations.
//! - `db_storage`: Transactional appointment operations.
//! - `docs`: OpenAPI document.
//! - `errors`: Error handling types.
//! - `lifecycle`: Appointment state machine.
//! - `models`: Database records.
//! - `money`: Monetary amounts in cents.
//! - `scheduling`: Storage-backed availability and slot validation.
//! - `seeding`: Demo catalog data.
//! - `validation`: Input parsing and normalization.
//! - `*_handler`, `handlers`: HTTP request handlers.

pub mod api;
pub mod core;

pub mod api_models;
pub mod app;
pub mod appointment_handler;
pub mod auth;
pub mod availability;
pub mod config;
pub mod customer_handler;
pub mod dashboard_handler;
pub mod db;
pub mod db_storage;
pub mod docs;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod money;
pub mod package_handler;
pub mod scheduling;
pub mod seeding;
pub mod staff_handler;
pub mod storefront_handler;
pub mod validation;
