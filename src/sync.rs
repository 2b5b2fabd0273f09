//! One full pass of pulling charge data from the remote service into the
//! store. Station and session syncs share a single transaction that only
//! commits once both phases finish; an error out of either phase discards
//! the whole run's writes.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use snafu::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, ChargePointApi, PortRecord, PricingRecord, StationRecord};
use crate::db::{
    queries::{self, QueryError},
    KilowattHours, NewPort, NewPricing, NewSession, NewStation, PortId, PricingId, SessionId,
    UserId,
};

#[derive(Debug)]
pub(crate) struct Options {
    pub sync_stations: bool,
    pub sessions: Option<DateRange>,
}

/// Session sync window; `end` is exclusive.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct Report {
    pub stations: Option<StationReport>,
    pub sessions: Option<SessionReport>,
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct StationReport {
    pub stations: usize,
    pub ports: usize,
    pub pricing_id: Option<PricingId>,
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct SessionReport {
    pub days: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub energy: KilowattHours,
}

/// Runs the configured sync phases inside one transaction, committed at
/// the very end.
pub(crate) fn run(
    db: &mut SqliteConnection,
    api: &impl ChargePointApi,
    options: &Options,
) -> Result<Report, Error> {
    db.transaction(|db| {
        let mut report = Report::default();

        if options.sync_stations {
            report.stations = Some(sync_stations(db, api)?);
        }

        if let Some(range) = options.sessions {
            report.sessions = Some(sync_sessions(db, api, range)?);
        }

        Ok(report)
    })
}

#[instrument(skip_all)]
fn sync_stations(
    db: &mut SqliteConnection,
    api: &impl ChargePointApi,
) -> Result<StationReport, Error> {
    info!("Fetching the station catalog");
    let stations = api.fetch_stations().context(FetchStationsSnafu)?;
    info!("The catalog lists {} stations", stations.len());

    let Some(first) = stations.first() else {
        warn!("The station catalog is empty; nothing to record");
        return Ok(StationReport::default());
    };

    // The service reports a rate schedule per station, but only the first
    // station's first entry becomes a row; every station this run records
    // points at that one plan.
    let plan = first.pricing.first().context(NoPricingSnafu)?;
    let pricing_id =
        queries::insert_pricing(db, &pricing_row(plan)).context(RecordPricingSnafu)?;

    let mut report = StationReport {
        pricing_id: Some(pricing_id),
        ..StationReport::default()
    };

    // Port keys come from one counter spanning every station in this call,
    // not a per-station sequence.
    let mut next_port_id = PortId(0);

    for (idx, station) in stations.iter().enumerate() {
        queries::insert_station(db, &station_row(station, pricing_id)).context(
            RecordStationSnafu {
                station_id: &station.station_id,
            },
        )?;
        report.stations += 1;

        for (port_number, port) in station.ports.iter().enumerate() {
            next_port_id.0 += 1;
            queries::insert_port(db, &port_row(station, port, next_port_id, port_number as i32))
                .context(RecordPortSnafu {
                    station_id: &station.station_id,
                    port_id: next_port_id.0,
                })?;
            report.ports += 1;
        }

        if idx > 0 && station.pricing != stations[idx - 1].pricing {
            warn!(
                station_id = %station.station_id,
                "More than one pricing model observed; only the first is recorded",
            );
        }
    }

    Ok(report)
}

#[instrument(skip_all)]
fn sync_sessions(
    db: &mut SqliteConnection,
    api: &impl ChargePointApi,
    range: DateRange,
) -> Result<SessionReport, Error> {
    let mut report = SessionReport::default();

    for (from, to) in DayWindows::new(range.start, range.end) {
        info!("Fetching usage sessions for {}", from.date_naive());
        let records = api.fetch_usage(from, to).context(FetchUsageSnafu { day: from })?;
        report.days += 1;

        for record in records {
            match load_session(db, record) {
                SessionOutcome::Loaded(energy) => {
                    report.loaded += 1;
                    report.energy += energy;
                }
                SessionOutcome::Skipped => report.skipped += 1,
            }
        }
    }

    if report.skipped > 0 {
        warn!("Dropped {} malformed or unloadable usage records", report.skipped);
    }

    Ok(report)
}

/// Per-record isolation: a record that cannot be coerced or stored is
/// dropped on its own and the batch continues.
#[derive(Debug, Copy, Clone, PartialEq)]
enum SessionOutcome {
    Loaded(KilowattHours),
    Skipped,
}

fn load_session(db: &mut SqliteConnection, record: crate::api::SessionRecord) -> SessionOutcome {
    let Some(session) = record.validated() else {
        debug!("Dropping a usage record with missing fields");
        return SessionOutcome::Skipped;
    };

    let row = NewSession {
        session_id: SessionId(session.session_id),
        started_at: session.started_at,
        ended_at: session.ended_at,
        energy: KilowattHours(session.energy),
        station_id: session.station_id,
        user_id: UserId(session.user_id),
        credential_id: session.credential_id,
        port_number: session.port_number,
    };

    let loaded = queries::insert_session(db, &row)
        .and_then(|_| queries::insert_user(db, row.user_id))
        .and_then(|_| queries::insert_payment(db, &row.credential_id));

    match loaded {
        Ok(_) => SessionOutcome::Loaded(row.energy),
        Err(error) => {
            warn!(
                %error,
                session_id = row.session_id.0,
                "Could not record a usage session; dropping it",
            );
            SessionOutcome::Skipped
        }
    }
}

/// Day-long fetch windows `[d 00:00:00, d 23:59:59]`, stepping one
/// calendar day at a time from `start` until the cursor equals `until`.
///
/// Termination is exact equality: an `until` that is not a whole number of
/// days past `start` is stepped over and iteration never ends.
pub(crate) struct DayWindows {
    cursor: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl DayWindows {
    pub(crate) fn new(start: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            cursor: start,
            until,
        }
    }
}

impl Iterator for DayWindows {
    type Item = (DateTime<Utc>, DateTime<Utc>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.until {
            return None;
        }

        let from = self.cursor;
        self.cursor = from + Duration::days(1);
        Some((from, from + Duration::seconds(86_399)))
    }
}

fn pricing_row(plan: &PricingRecord) -> NewPricing {
    NewPricing {
        plan_type: plan.plan_type.clone(),
        starts_at: plan.starts_at.clone(),
        ends_at: plan.ends_at.clone(),
        min_price: plan.min_price,
        max_price: plan.max_price,
        initial_unit_price_duration: plan.initial_unit_price_duration.clone(),
        unit_price_per_hour: plan.unit_price_per_hour,
        unit_price_per_hour_thereafter: plan.unit_price_per_hour_thereafter.clone(),
        unit_price_per_session: plan.unit_price_per_session,
        unit_price_per_kwh: plan.unit_price_per_kwh,
    }
}

fn station_row(station: &StationRecord, pricing_id: PricingId) -> NewStation {
    NewStation {
        station_id: station.station_id.clone(),
        model: station.model.clone(),
        activated_at: station.activated_at,
        port_count: station.port_count,
        address: station.address.clone(),
        city: station.city.clone(),
        state: station.state.clone(),
        postal_code: station.postal_code.clone(),
        pricing_id,
    }
}

fn port_row(
    station: &StationRecord,
    port: &PortRecord,
    port_id: PortId,
    port_number: i32,
) -> NewPort {
    NewPort {
        port_id,
        station_id: station.station_id.clone(),
        port_number,
        level: port.level.clone(),
        connector: port.connector.clone(),
        voltage: port.voltage,
        current: port.current,
        power: port.power,
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum Error {
    #[snafu(display("Could not fetch the station catalog"))]
    FetchStations { source: ApiError },

    #[snafu(display("The first station in the catalog has no pricing entries"))]
    NoPricing,

    #[snafu(display("Could not record the pricing plan"))]
    RecordPricing { source: QueryError },

    #[snafu(display("Could not record station {station_id}"))]
    RecordStation {
        station_id: String,
        source: QueryError,
    },

    #[snafu(display("Could not record port {port_id} of station {station_id}"))]
    RecordPort {
        station_id: String,
        port_id: i64,
        source: QueryError,
    },

    #[snafu(display("Could not fetch usage sessions for {day}"))]
    FetchUsage {
        day: DateTime<Utc>,
        source: ApiError,
    },

    #[snafu(context(false))]
    #[snafu(display("The sync transaction failed"))]
    Transaction { source: QueryError },
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::api::SessionRecord;
    use crate::db::{self, schema};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        utc(2014, 1, d, 0, 0, 0)
    }

    fn pricing(plan_type: &str) -> PricingRecord {
        PricingRecord {
            plan_type: plan_type.into(),
            starts_at: "00:00:00".into(),
            ends_at: "23:59:59".into(),
            min_price: 0.0,
            max_price: 5.0,
            initial_unit_price_duration: "60".into(),
            unit_price_per_hour: 1.5,
            unit_price_per_hour_thereafter: "2.0".into(),
            unit_price_per_session: 1.0,
            unit_price_per_kwh: 0.25,
        }
    }

    fn port() -> PortRecord {
        PortRecord {
            level: "L2".into(),
            connector: "J1772".into(),
            voltage: 240,
            current: 30,
            power: 6.6,
        }
    }

    fn station(id: &str, ports: usize, pricing: Vec<PricingRecord>) -> StationRecord {
        StationRecord {
            station_id: id.into(),
            model: "CT2100-HD-CCR".into(),
            activated_at: utc(2013, 7, 15, 0, 0, 0),
            port_count: ports as i32,
            address: "1 Main St".into(),
            city: "Oakland".into(),
            state: "CA".into(),
            postal_code: "94607".into(),
            ports: std::iter::repeat_with(port).take(ports).collect(),
            pricing,
        }
    }

    fn session(id: i64) -> SessionRecord {
        SessionRecord {
            session_id: Some(id),
            started_at: Some(utc(2014, 1, 1, 8, 0, 0)),
            ended_at: Some(utc(2014, 1, 1, 9, 30, 0)),
            energy: Some(5.0),
            station_id: Some("1:00001".into()),
            user_id: Some(77),
            credential_id: Some("CNT-000123".into()),
            port_number: Some(1),
        }
    }

    #[derive(Default)]
    struct FakeApi {
        stations: Vec<StationRecord>,
        usage: RefCell<VecDeque<Vec<SessionRecord>>>,
        usage_calls: RefCell<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
        usage_is_down: bool,
    }

    impl FakeApi {
        fn with_usage(days: Vec<Vec<SessionRecord>>) -> Self {
            Self {
                usage: RefCell::new(days.into()),
                ..Self::default()
            }
        }
    }

    impl ChargePointApi for FakeApi {
        fn fetch_stations(&self) -> Result<Vec<StationRecord>, ApiError> {
            Ok(self.stations.clone())
        }

        fn fetch_usage(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<SessionRecord>, ApiError> {
            self.usage_calls.borrow_mut().push((from, to));
            if self.usage_is_down {
                return Err("the usage endpoint is down".into());
            }
            Ok(self.usage.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    #[test]
    fn two_stations_share_one_pricing_row_and_ports_are_numbered_globally() {
        let mut db = db::open_in_memory();
        let api = FakeApi {
            stations: vec![
                station("1:00001", 2, vec![pricing("Session")]),
                station("1:00002", 2, vec![pricing("Session")]),
            ],
            ..FakeApi::default()
        };

        let report = sync_stations(&mut db, &api).unwrap();
        assert_eq!(report.stations, 2);
        assert_eq!(report.ports, 4);

        let pricing_count: i64 = schema::pricing_plans::table
            .count()
            .get_result(&mut db)
            .unwrap();
        assert_eq!(pricing_count, 1);

        let pricing_ids: Vec<PricingId> = schema::stations::table
            .select(schema::stations::pricing_id)
            .load(&mut db)
            .unwrap();
        assert_eq!(pricing_ids, [report.pricing_id.unwrap(); 2]);

        let ports: Vec<(PortId, String, i32)> = schema::ports::table
            .select((
                schema::ports::port_id,
                schema::ports::station_id,
                schema::ports::port_number,
            ))
            .order(schema::ports::port_id)
            .load(&mut db)
            .unwrap();
        assert_eq!(
            ports,
            [
                (PortId(1), "1:00001".into(), 0),
                (PortId(2), "1:00001".into(), 1),
                (PortId(3), "1:00002".into(), 0),
                (PortId(4), "1:00002".into(), 1),
            ],
        );
    }

    #[test]
    fn every_station_sync_appends_a_pricing_row() {
        let mut db = db::open_in_memory();
        let api = FakeApi {
            stations: vec![station("1:00001", 1, vec![pricing("Session")])],
            ..FakeApi::default()
        };

        let first = sync_stations(&mut db, &api).unwrap();
        let second = sync_stations(&mut db, &api).unwrap();
        assert_ne!(first.pricing_id, second.pricing_id);

        let pricing_count: i64 = schema::pricing_plans::table
            .count()
            .get_result(&mut db)
            .unwrap();
        assert_eq!(pricing_count, 2);

        // The station row survives from the first run and keeps its
        // original pricing assignment.
        let pricing_ids: Vec<PricingId> = schema::stations::table
            .select(schema::stations::pricing_id)
            .load(&mut db)
            .unwrap();
        assert_eq!(pricing_ids, [first.pricing_id.unwrap()]);
    }

    #[test]
    fn divergent_pricing_lists_are_not_fatal() {
        let mut db = db::open_in_memory();
        let api = FakeApi {
            stations: vec![
                station("1:00001", 1, vec![pricing("Session")]),
                station("1:00002", 1, vec![pricing("Hourly")]),
            ],
            ..FakeApi::default()
        };

        let report = sync_stations(&mut db, &api).unwrap();
        assert_eq!(report.stations, 2);

        let pricing_count: i64 = schema::pricing_plans::table
            .count()
            .get_result(&mut db)
            .unwrap();
        assert_eq!(pricing_count, 1);
    }

    #[test]
    fn an_empty_catalog_records_nothing() {
        let mut db = db::open_in_memory();
        let api = FakeApi::default();

        let report = sync_stations(&mut db, &api).unwrap();
        assert_eq!(report, StationReport::default());
    }

    #[test]
    fn a_first_station_without_pricing_aborts() {
        let mut db = db::open_in_memory();
        let api = FakeApi {
            stations: vec![station("1:00001", 1, vec![])],
            ..FakeApi::default()
        };

        let error = sync_stations(&mut db, &api).unwrap_err();
        assert!(matches!(error, Error::NoPricing));
    }

    #[test]
    fn a_malformed_record_is_skipped_alone() {
        let mut db = db::open_in_memory();
        let anonymous = SessionRecord {
            user_id: None,
            ..session(2)
        };
        let api = FakeApi::with_usage(vec![vec![session(1), anonymous, session(3)]]);

        let range = DateRange {
            start: day(1),
            end: day(2),
        };
        let report = sync_sessions(&mut db, &api, range).unwrap();

        assert_eq!(report.days, 1);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.energy, KilowattHours(10.0));

        let session_ids: Vec<SessionId> = schema::sessions::table
            .select(schema::sessions::session_id)
            .order(schema::sessions::session_id)
            .load(&mut db)
            .unwrap();
        assert_eq!(session_ids, [SessionId(1), SessionId(3)]);

        let user_count: i64 = schema::users::table.count().get_result(&mut db).unwrap();
        let payment_count: i64 = schema::payments::table.count().get_result(&mut db).unwrap();
        assert_eq!((user_count, payment_count), (1, 1));
    }

    #[test]
    fn a_nine_day_range_fetches_nine_day_windows() {
        let mut db = db::open_in_memory();
        let api = FakeApi::default();

        let range = DateRange {
            start: day(1),
            end: day(10),
        };
        let report = sync_sessions(&mut db, &api, range).unwrap();
        assert_eq!(report.days, 9);

        let calls = api.usage_calls.borrow();
        assert_eq!(calls.len(), 9);
        assert_eq!(calls[0], (day(1), utc(2014, 1, 1, 23, 59, 59)));
        assert_eq!(calls[8], (day(9), utc(2014, 1, 9, 23, 59, 59)));
    }

    #[test]
    fn an_unaligned_end_is_stepped_past() {
        let start = day(1);
        let end = start + Duration::hours(36);

        let starts: Vec<_> = DayWindows::new(start, end)
            .take(4)
            .map(|(from, _)| from)
            .collect();

        // The cursor never equals `end`, so iteration continues beyond it.
        assert_eq!(starts, [day(1), day(2), day(3), day(4)]);
        assert!(starts[3] > end);
    }

    #[test]
    fn re_running_a_session_sync_does_not_duplicate_rows() {
        let mut db = db::open_in_memory();
        let range = DateRange {
            start: day(1),
            end: day(2),
        };

        for _ in 0..2 {
            let api = FakeApi::with_usage(vec![vec![session(1)]]);
            sync_sessions(&mut db, &api, range).unwrap();
        }

        let session_count: i64 = schema::sessions::table.count().get_result(&mut db).unwrap();
        assert_eq!(session_count, 1);
    }

    #[test]
    fn a_failure_mid_run_discards_the_whole_run() {
        let mut db = db::open_in_memory();
        let api = FakeApi {
            stations: vec![station("1:00001", 2, vec![pricing("Session")])],
            usage_is_down: true,
            ..FakeApi::default()
        };
        let options = Options {
            sync_stations: true,
            sessions: Some(DateRange {
                start: day(1),
                end: day(2),
            }),
        };

        let error = run(&mut db, &api, &options).unwrap_err();
        assert!(matches!(error, Error::FetchUsage { .. }));

        // The station phase had succeeded, but nothing was committed.
        let station_count: i64 = schema::stations::table.count().get_result(&mut db).unwrap();
        let pricing_count: i64 = schema::pricing_plans::table
            .count()
            .get_result(&mut db)
            .unwrap();
        assert_eq!((station_count, pricing_count), (0, 0));
    }

    #[test]
    fn a_full_run_reports_both_phases() {
        let mut db = db::open_in_memory();
        let api = FakeApi {
            stations: vec![station("1:00001", 1, vec![pricing("Session")])],
            usage: RefCell::new(vec![vec![session(1), session(2)]].into()),
            ..FakeApi::default()
        };
        let options = Options {
            sync_stations: true,
            sessions: Some(DateRange {
                start: day(1),
                end: day(2),
            }),
        };

        let report = run(&mut db, &api, &options).unwrap();

        let stations = report.stations.unwrap();
        assert_eq!((stations.stations, stations.ports), (1, 1));

        let sessions = report.sessions.unwrap();
        assert_eq!((sessions.loaded, sessions.skipped), (2, 0));
    }
}
