use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_newtype::DieselNewType;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use snafu::prelude::*;
use std::fmt;
use tracing::info;

pub(crate) mod queries;
pub(crate) mod schema;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DieselNewType)]
pub(crate) struct UserId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DieselNewType)]
pub(crate) struct SessionId(pub i64);

/// Store-generated surrogate key for a pricing row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DieselNewType)]
pub(crate) struct PricingId(pub i64);

/// Locally assigned port key, unique across the whole port table. The
/// remote service does not identify ports; one sync run numbers them with
/// a single counter shared across every station it processes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DieselNewType)]
pub(crate) struct PortId(pub i64);

#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sum,
    PartialOrd,
    PartialEq,
    DieselNewType,
)]
pub(crate) struct KilowattHours(pub f64);

impl fmt::Display for KilowattHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kWh", self.0)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::pricing_plans)]
pub(crate) struct NewPricing {
    pub plan_type: String,
    pub starts_at: String,
    pub ends_at: String,
    pub min_price: f64,
    pub max_price: f64,
    pub initial_unit_price_duration: String,
    pub unit_price_per_hour: f64,
    pub unit_price_per_hour_thereafter: String,
    pub unit_price_per_session: f64,
    pub unit_price_per_kwh: f64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::stations)]
pub(crate) struct NewStation {
    pub station_id: String,
    pub model: String,
    pub activated_at: DateTime<Utc>,
    pub port_count: i32,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub pricing_id: PricingId,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::ports)]
pub(crate) struct NewPort {
    pub port_id: PortId,
    pub station_id: String,
    pub port_number: i32,
    pub level: String,
    pub connector: String,
    pub voltage: i32,
    pub current: i32,
    pub power: f64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::sessions)]
pub(crate) struct NewSession {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub energy: KilowattHours,
    pub station_id: String,
    pub user_id: UserId,
    pub credential_id: String,
    pub port_number: i32,
}

/// Opens the store and ensures the schema exists. Safe to call on every
/// run; already-applied migrations are skipped.
pub(crate) fn init(database_url: &str) -> DbResult<SqliteConnection> {
    let mut db = SqliteConnection::establish(database_url).context(ConnectSnafu)?;
    apply_migrations(&mut db)?;
    Ok(db)
}

fn apply_migrations(db: &mut SqliteConnection) -> DbResult<()> {
    let migrations = db
        .pending_migrations(MIGRATIONS)
        .context(MigrationListSnafu)?;

    if migrations.is_empty() {
        info!("Schema is up to date");
    }

    for migration in migrations {
        info!("Starting migration {}", migration.name());
        db.run_migration(&migration).context(MigrationRunSnafu)?;
    }

    Ok(())
}

#[derive(Debug, Snafu)]
pub(crate) enum DbError {
    #[snafu(display("Could not connect to the database"))]
    Connect {
        source: diesel::result::ConnectionError,
    },

    #[snafu(display("Could not determine migration status"))]
    MigrationList {
        source: Box<dyn snafu::Error + Send + Sync>,
    },

    #[snafu(display("Could not run migrations"))]
    MigrationRun {
        source: Box<dyn snafu::Error + Send + Sync>,
    },
}

pub(crate) type DbResult<T, E = DbError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) fn open_in_memory() -> SqliteConnection {
    init(":memory:").expect("could not open an in-memory database")
}
