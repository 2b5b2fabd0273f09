//! The remote ChargePoint-style web service. Field names follow the wire
//! spelling of the service's `getStations` / `getChargingSessionData`
//! operations; everything the sync core reads is coerced to a typed record
//! here, at the boundary.

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::prelude::*;

pub(crate) type ApiError = Box<dyn snafu::Error + Send + Sync + 'static>;

/// The two operations the sync engine needs from the remote service.
///
/// Authentication and transport are the implementation's concern; the
/// engine only sees typed records. Usage queries return at most one page
/// (100 records) per call and expose no cursor.
pub(crate) trait ChargePointApi {
    fn fetch_stations(&self) -> Result<Vec<StationRecord>, ApiError>;

    fn fetch_usage(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct StationRecord {
    #[serde(rename = "stationID")]
    pub station_id: String,
    #[serde(rename = "stationModel")]
    pub model: String,
    #[serde(rename = "stationActivationDate")]
    pub activated_at: DateTime<Utc>,
    #[serde(rename = "numPorts")]
    pub port_count: i32,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "postalCode")]
    pub postal_code: String,
    #[serde(rename = "Port", default)]
    pub ports: Vec<PortRecord>,
    #[serde(rename = "Pricing", default)]
    pub pricing: Vec<PricingRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct PortRecord {
    #[serde(rename = "Level")]
    pub level: String,
    #[serde(rename = "Connector")]
    pub connector: String,
    #[serde(rename = "Voltage")]
    pub voltage: i32,
    #[serde(rename = "Current")]
    pub current: i32,
    #[serde(rename = "Power")]
    pub power: f64,
}

/// One entry of a station's rate schedule. The validity window fields are
/// opaque service-formatted strings and are stored as-is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct PricingRecord {
    #[serde(rename = "Type")]
    pub plan_type: String,
    #[serde(rename = "startTime")]
    pub starts_at: String,
    #[serde(rename = "endTime")]
    pub ends_at: String,
    #[serde(rename = "minPrice")]
    pub min_price: f64,
    #[serde(rename = "maxPrice")]
    pub max_price: f64,
    #[serde(rename = "initialUnitPriceDuration")]
    pub initial_unit_price_duration: String,
    #[serde(rename = "unitPricePerHour")]
    pub unit_price_per_hour: f64,
    #[serde(rename = "unitPricePerHourThereafter")]
    pub unit_price_per_hour_thereafter: String,
    #[serde(rename = "unitPricePerSession")]
    pub unit_price_per_session: f64,
    #[serde(rename = "unitPricePerKWh")]
    pub unit_price_per_kwh: f64,
}

/// A usage record as the service reports it. Every field is optional
/// because the service does emit records with holes (an anonymous session
/// has no `userID`, for example); whole-record validation happens via
/// [`SessionRecord::validated`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct SessionRecord {
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<i64>,
    #[serde(rename = "startTime", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "endTime", default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "Energy", default)]
    pub energy: Option<f64>,
    #[serde(rename = "stationID", default)]
    pub station_id: Option<String>,
    #[serde(rename = "userID", default)]
    pub user_id: Option<i64>,
    #[serde(rename = "credentialID", default)]
    pub credential_id: Option<String>,
    #[serde(rename = "portNumber", default)]
    pub port_number: Option<i32>,
}

impl SessionRecord {
    /// All-or-nothing coercion; a record missing any required field
    /// produces `None` and must be skipped as a whole.
    pub(crate) fn validated(self) -> Option<ValidSession> {
        Some(ValidSession {
            session_id: self.session_id?,
            started_at: self.started_at?,
            ended_at: self.ended_at?,
            energy: self.energy?,
            station_id: self.station_id?,
            user_id: self.user_id?,
            credential_id: self.credential_id?,
            port_number: self.port_number?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValidSession {
    pub session_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub energy: f64,
    pub station_id: String,
    pub user_id: i64,
    pub credential_id: String,
    pub port_number: i32,
}

#[derive(Debug, Deserialize)]
struct StationsResponse {
    #[serde(rename = "stationData", default)]
    station_data: Vec<StationRecord>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(rename = "ChargingSessionData", default)]
    charging_session_data: Vec<SessionRecord>,
}

#[derive(Debug, Serialize)]
struct UsageSearchQuery {
    #[serde(rename = "fromTimeStamp")]
    from_time_stamp: DateTime<Utc>,
    #[serde(rename = "toTimeStamp")]
    to_time_stamp: DateTime<Utc>,
}

pub(crate) struct HttpApi {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpApi {
    pub(crate) fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn call<B, T>(&self, operation: &'static str, body: &B) -> Result<T, Error>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}/{operation}", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .context(SendSnafu { operation })?
            .error_for_status()
            .context(StatusSnafu { operation })?;

        let body = response.text().context(ReadBodySnafu { operation })?;
        serde_json::from_str(&body).context(DeserializeSnafu { operation })
    }
}

impl ChargePointApi for HttpApi {
    fn fetch_stations(&self) -> Result<Vec<StationRecord>, ApiError> {
        let response: StationsResponse = self
            .call("getStations", &serde_json::json!({}))
            .map_err(ApiError::from)?;
        Ok(response.station_data)
    }

    fn fetch_usage(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, ApiError> {
        let query = UsageSearchQuery {
            from_time_stamp: from,
            to_time_stamp: to,
        };
        let response: UsageResponse = self
            .call("getChargingSessionData", &query)
            .map_err(ApiError::from)?;
        Ok(response.charging_session_data)
    }
}

#[derive(Debug, Snafu)]
pub(crate) enum Error {
    #[snafu(display("Could not send the {operation} request"))]
    Send {
        operation: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("The {operation} request was rejected"))]
    Status {
        operation: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("Could not read the {operation} response body"))]
    ReadBody {
        operation: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("Could not deserialize the {operation} response"))]
    Deserialize {
        operation: &'static str,
        source: serde_json::Error,
    },
}
