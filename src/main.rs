#![deny(rust_2018_idioms)]
#![warn(unused_crate_dependencies)]
#![warn(clippy::items_after_statements)]

use chrono::{DateTime, NaiveDate, Utc};
use snafu::prelude::*;
use std::{env, fs};
use tracing::info;

// Linked through diesel; named here so the bundled SQLite build applies.
use libsqlite3_sys as _;

mod api;
mod db;
mod sync;

const LOG_ENV_NAME: &str = "CHARGE_SYNC_LOG";
const DEFAULT_API_URL: &str = "https://webservices.chargepoint.com/api/v5";

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_env(LOG_ENV_NAME);
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn api_password_from_env() -> Option<String> {
    if let Ok(password) = env::var("CHARGE_SYNC_API_PASSWORD") {
        return Some(password);
    }

    if let Ok(password_file) = env::var("CHARGE_SYNC_API_PASSWORD_FILE") {
        let password = fs::read_to_string(password_file).ok()?;
        return Some(password.trim().to_owned());
    }

    None
}

fn day_from_env(name: &str) -> DateTime<Utc> {
    let raw = env::var(name).unwrap_or_else(|_| panic!("{name} must be set"));
    let day = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .unwrap_or_else(|_| panic!("{name} must be a YYYY-MM-DD date"));
    day.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

#[derive(Debug)]
struct Config {
    database_path: String,
    api_url: String,
    api_username: String,
    api_password: String,
    sync_stations: bool,
    sessions: Option<sync::DateRange>,
}

impl Config {
    fn from_env() -> Self {
        let database_path =
            env::var("CHARGE_SYNC_DATABASE").expect("CHARGE_SYNC_DATABASE must be set");
        let api_url = env::var("CHARGE_SYNC_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let api_username =
            env::var("CHARGE_SYNC_API_USERNAME").expect("CHARGE_SYNC_API_USERNAME must be set");
        let api_password =
            api_password_from_env().expect("CHARGE_SYNC_API_PASSWORD must be set");

        let sync_stations = env::var_os("CHARGE_SYNC_SKIP_STATIONS").is_none();
        let sessions = if env::var_os("CHARGE_SYNC_SKIP_SESSIONS").is_some() {
            None
        } else {
            Some(sync::DateRange {
                start: day_from_env("CHARGE_SYNC_START"),
                end: day_from_env("CHARGE_SYNC_END"),
            })
        };

        Self {
            database_path,
            api_url,
            api_username,
            api_password,
            sync_stations,
            sessions,
        }
    }
}

#[snafu::report]
fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();

    let mut db = db::init(&config.database_path).context(DatabaseConnectSnafu)?;
    let api = api::HttpApi::new(config.api_url, config.api_username, config.api_password);

    let options = sync::Options {
        sync_stations: config.sync_stations,
        sessions: config.sessions,
    };

    let report = sync::run(&mut db, &api, &options).context(SyncSnafu)?;

    if let Some(stations) = &report.stations {
        info!(
            "Recorded {} stations and {} ports",
            stations.stations, stations.ports,
        );
    }
    if let Some(sessions) = &report.sessions {
        info!(
            "Loaded {} usage sessions ({}) across {} days; dropped {}",
            sessions.loaded, sessions.energy, sessions.days, sessions.skipped,
        );
    }

    println!("Completed sync, saved to: {}", config.database_path);

    Ok(())
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Could not open the charge database"))]
    DatabaseConnect { source: db::DbError },

    #[snafu(display("Could not synchronize the charge data"))]
    Sync { source: sync::Error },
}
