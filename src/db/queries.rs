//! Row-level inserts. Every table except `pricing_plans` is keyed by an
//! identifier the remote service assigned, so re-running a sync must not
//! duplicate or overwrite rows: inserts silently no-op on a primary-key
//! conflict and the first-written row wins. `pricing_plans` has no natural
//! key and always appends, handing back the store-generated id.

use diesel::prelude::*;

use super::schema::{payments, ports, pricing_plans, sessions, stations, users};
use super::{NewPort, NewPricing, NewSession, NewStation, PricingId, UserId};

pub(crate) type QueryError = diesel::result::Error;
pub(crate) type QueryResult<T, E = QueryError> = std::result::Result<T, E>;

/// Whether an upsert-ignore landed a row or hit an existing key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Upsert {
    Inserted,
    AlreadyPresent,
}

impl Upsert {
    fn from_row_count(rows: usize) -> Self {
        if rows == 0 {
            Upsert::AlreadyPresent
        } else {
            Upsert::Inserted
        }
    }
}

pub(crate) fn insert_user(db: &mut SqliteConnection, user_id: UserId) -> QueryResult<Upsert> {
    diesel::insert_or_ignore_into(users::table)
        .values(users::user_id.eq(user_id))
        .execute(db)
        .map(Upsert::from_row_count)
}

pub(crate) fn insert_payment(db: &mut SqliteConnection, credential_id: &str) -> QueryResult<Upsert> {
    diesel::insert_or_ignore_into(payments::table)
        .values(payments::credential_id.eq(credential_id))
        .execute(db)
        .map(Upsert::from_row_count)
}

pub(crate) fn insert_pricing(db: &mut SqliteConnection, row: &NewPricing) -> QueryResult<PricingId> {
    diesel::insert_into(pricing_plans::table)
        .values(row)
        .returning(pricing_plans::pricing_id)
        .get_result(db)
}

pub(crate) fn insert_station(db: &mut SqliteConnection, row: &NewStation) -> QueryResult<Upsert> {
    diesel::insert_or_ignore_into(stations::table)
        .values(row)
        .execute(db)
        .map(Upsert::from_row_count)
}

pub(crate) fn insert_port(db: &mut SqliteConnection, row: &NewPort) -> QueryResult<Upsert> {
    diesel::insert_or_ignore_into(ports::table)
        .values(row)
        .execute(db)
        .map(Upsert::from_row_count)
}

pub(crate) fn insert_session(db: &mut SqliteConnection, row: &NewSession) -> QueryResult<Upsert> {
    diesel::insert_or_ignore_into(sessions::table)
        .values(row)
        .execute(db)
        .map(Upsert::from_row_count)
}
