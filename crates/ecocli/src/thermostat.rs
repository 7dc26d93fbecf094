//! Thermostat API client.
//!
//! Thin consumer of the authenticated session: every call is a GET or POST to
//! `<api_base>/thermostat` carrying `format=json` and a JSON `body` query
//! parameter. Temperatures travel in tenths of a degree Fahrenheit.

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use pin_auth::{AuthError, AuthenticatedRequest, SessionManager};
use reqwest::{Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Thermostat API status code for an expired access token.
const TOKEN_EXPIRED_CODE: i64 = 14;

/// Errors from thermostat calls.
#[derive(Error, Debug)]
pub enum ThermostatError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Thermostat API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Thermostat API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Temperature must be a finite number of degrees, got {0}")]
    InvalidTemperature(f64),

    #[error("No thermostat matched the selection")]
    NotFound,

    #[error("Malformed thermostat response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type ThermostatResult<T> = Result<T, ThermostatError>;

/// HVAC mode accepted by the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum HvacMode {
    Auto,
    AuxHeatOnly,
    Cool,
    Heat,
    Off,
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HvacMode::Auto => "auto",
            HvacMode::AuxHeatOnly => "auxHeatOnly",
            HvacMode::Cool => "cool",
            HvacMode::Heat => "heat",
            HvacMode::Off => "off",
        };
        f.write_str(name)
    }
}

/// Which thermostats a call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every thermostat registered to the account.
    Registered,
    /// Thermostats with the given identifiers.
    Thermostats(Vec<String>),
}

impl Selection {
    pub fn from_id(id: Option<&str>) -> Self {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Selection::Thermostats(vec![id.to_string()]),
            None => Selection::Registered,
        }
    }

    fn to_json(&self, include_details: bool) -> Value {
        let (selection_type, selection_match) = match self {
            Selection::Registered => ("registered", String::new()),
            Selection::Thermostats(ids) => ("thermostats", ids.join(",")),
        };
        let mut selection = json!({
            "selectionType": selection_type,
            "selectionMatch": selection_match,
        });
        if include_details {
            selection["includeSettings"] = json!(true);
            selection["includeRuntime"] = json!(true);
        }
        selection
    }
}

/// A temperature hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hold {
    /// Target temperature in °F, used for both heat and cool set points.
    pub temperature: f64,
    /// Hours to hold; until the next scheduled transition when `None`.
    pub duration_hours: Option<u32>,
}

impl Hold {
    fn params(&self) -> Value {
        let tenths = to_tenths(self.temperature);
        let mut params = json!({
            "holdType": if self.duration_hours.is_some() { "holdHours" } else { "nextTransition" },
            "heatHoldTemp": tenths,
            "coolHoldTemp": tenths,
        });
        if let Some(hours) = self.duration_hours {
            params["holdHours"] = json!(hours);
        }
        params
    }
}

/// Rounded to the nearest tenth of a degree.
fn to_tenths(degrees: f64) -> i64 {
    (degrees * 10.0).round() as i64
}

fn from_tenths(tenths: i64) -> f64 {
    tenths as f64 / 10.0
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: ApiStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThermostatListResponse {
    #[serde(default)]
    thermostat_list: Vec<ThermostatRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThermostatRecord {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    name: String,
    settings: Settings,
    runtime: Runtime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    hvac_mode: String,
    heat_range_high: i64,
    heat_range_low: i64,
    cool_range_high: i64,
    cool_range_low: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Runtime {
    actual_temperature: i64,
    desired_heat: i64,
    desired_cool: i64,
}

/// Current state of one thermostat, in °F.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatStatus {
    pub identifier: String,
    pub name: String,
    pub hvac_mode: String,
    pub actual_temperature: f64,
    pub desired_heat: f64,
    pub desired_cool: f64,
    pub heat_range: (f64, f64),
    pub cool_range: (f64, f64),
}

impl From<ThermostatRecord> for ThermostatStatus {
    fn from(record: ThermostatRecord) -> Self {
        Self {
            identifier: record.identifier,
            name: record.name,
            hvac_mode: record.settings.hvac_mode,
            actual_temperature: from_tenths(record.runtime.actual_temperature),
            desired_heat: from_tenths(record.runtime.desired_heat),
            desired_cool: from_tenths(record.runtime.desired_cool),
            heat_range: (
                from_tenths(record.settings.heat_range_low),
                from_tenths(record.settings.heat_range_high),
            ),
            cool_range: (
                from_tenths(record.settings.cool_range_low),
                from_tenths(record.settings.cool_range_high),
            ),
        }
    }
}

impl fmt::Display for ThermostatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.name.is_empty() {
            writeln!(f, "thermostat:   {} ({})", self.name, self.identifier)?;
        }
        writeln!(f, "current mode: {}", self.hvac_mode)?;
        writeln!(f, "current temp: {}", self.actual_temperature)?;
        writeln!(f, "desired heat: {}", self.desired_heat)?;
        writeln!(f, "desired cool: {}", self.desired_cool)?;
        writeln!(f, "heat range:   {} - {}", self.heat_range.0, self.heat_range.1)?;
        write!(f, "cool range:   {} - {}", self.cool_range.0, self.cool_range.1)
    }
}

/// Acknowledgement of an update call.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateAck {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for UpdateAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "ok")
        } else {
            write!(f, "ok ({})", self.message)
        }
    }
}

/// Client for the thermostat endpoint.
pub struct ThermostatClient {
    session: Arc<SessionManager>,
    endpoint: Url,
    selection: Selection,
}

impl ThermostatClient {
    pub fn new(session: Arc<SessionManager>, api_base: &Url, selection: Selection) -> ThermostatResult<Self> {
        let base = if api_base.path().ends_with('/') {
            api_base.clone()
        } else {
            Url::parse(&format!("{}/", api_base))?
        };
        Ok(Self {
            session,
            endpoint: base.join("thermostat")?,
            selection,
        })
    }

    /// Fetch settings and runtime for the selected thermostats.
    pub async fn status(&self) -> ThermostatResult<Vec<ThermostatStatus>> {
        let body = json!({ "selection": self.selection.to_json(true) });
        let value = self.call(Method::GET, &body).await?;
        let list: ThermostatListResponse = serde_json::from_value(value)?;

        if list.thermostat_list.is_empty() {
            return Err(ThermostatError::NotFound);
        }
        Ok(list
            .thermostat_list
            .into_iter()
            .map(ThermostatStatus::from)
            .collect())
    }

    pub async fn set_mode(&self, mode: HvacMode) -> ThermostatResult<UpdateAck> {
        let body = json!({
            "selection": self.selection.to_json(false),
            "thermostat": { "settings": { "hvacMode": mode } },
        });
        info!(mode = %mode, "Setting HVAC mode");
        self.update(&body).await
    }

    pub async fn set_hold(&self, hold: Hold) -> ThermostatResult<UpdateAck> {
        if !hold.temperature.is_finite() {
            return Err(ThermostatError::InvalidTemperature(hold.temperature));
        }
        let body = json!({
            "selection": self.selection.to_json(false),
            "functions": [{ "type": "setHold", "params": hold.params() }],
        });
        info!(
            temperature = hold.temperature,
            duration_hours = ?hold.duration_hours,
            "Setting temperature hold"
        );
        self.update(&body).await
    }

    /// Cancel the active hold and return to the schedule.
    pub async fn resume_program(&self) -> ThermostatResult<UpdateAck> {
        let body = json!({
            "selection": self.selection.to_json(false),
            "functions": [{ "type": "resumeProgram", "params": { "resumeAll": false } }],
        });
        info!("Resuming program");
        self.update(&body).await
    }

    async fn update(&self, body: &Value) -> ThermostatResult<UpdateAck> {
        let value = self.call(Method::POST, body).await?;
        let envelope: StatusEnvelope = serde_json::from_value(value)?;
        Ok(UpdateAck {
            code: envelope.status.code,
            message: envelope.status.message,
        })
    }

    /// Send one call. An expired-token status from the API forces a refresh
    /// and a single replay. The refresh is keyed on the rejected token, so
    /// concurrent calls rejected with the same token share one refresh.
    async fn call(&self, method: Method, body: &Value) -> ThermostatResult<Value> {
        let (response, access_token) = self.send(method.clone(), body).await?;
        match Self::interpret(response).await {
            Err(ThermostatError::Api { code, .. }) if code == TOKEN_EXPIRED_CODE => {
                warn!("Thermostat API reported an expired token, refreshing");
                self.session.refresh_rejected(&access_token).await?;
                let (response, _) = self.send(method, body).await?;
                Self::interpret(response).await
            }
            other => other,
        }
    }

    async fn send(&self, method: Method, body: &Value) -> ThermostatResult<(Response, String)> {
        let request = AuthenticatedRequest::new(method, self.endpoint.clone())
            .query("format", "json")
            .query("body", body.to_string());

        debug!(method = %request.method, url = %self.endpoint, "Calling thermostat API");
        Ok(self.session.send_with_token(request).await?)
    }

    async fn interpret(response: Response) -> ThermostatResult<Value> {
        let status = response.status();
        let text = response.text().await?;

        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(ThermostatError::Http {
                    status: status.as_u16(),
                    body: text,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Ok(envelope) = serde_json::from_value::<StatusEnvelope>(value.clone()) {
            if envelope.status.code != 0 {
                warn!(
                    http_status = %status,
                    code = envelope.status.code,
                    message = %envelope.status.message,
                    "Thermostat API returned an error status"
                );
                return Err(ThermostatError::Api {
                    code: envelope.status.code,
                    message: envelope.status.message,
                });
            }
        }

        if !status.is_success() {
            return Err(ThermostatError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use credential_store::{MemoryCredentialStore, PersistedRecord, Token};
    use ecocli_core::ScopeDelimiter;
    use pin_auth::SessionContext;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn status_body() -> Value {
        json!({
            "thermostatList": [{
                "identifier": "511876645706",
                "name": "Upstairs",
                "settings": {
                    "hvacMode": "heat",
                    "heatRangeHigh": 790,
                    "heatRangeLow": 450,
                    "coolRangeHigh": 920,
                    "coolRangeLow": 650
                },
                "runtime": {
                    "actualTemperature": 684,
                    "desiredHeat": 690,
                    "desiredCool": 760
                }
            }],
            "status": { "code": 0, "message": "" }
        })
    }

    async fn client_for(server: &MockServer, selection: Selection) -> ThermostatClient {
        let context = SessionContext {
            client_id: "client-abc".to_string(),
            scopes: vec!["smartWrite".to_string()],
            delimiter: ScopeDelimiter::Space,
            authorize_url: Url::parse(&format!("{}/authorize", server.uri())).unwrap(),
            token_url: Url::parse(&format!("{}/token", server.uri())).unwrap(),
            portal_url: "https://portal.example".to_string(),
        };
        let store = Arc::new(MemoryCredentialStore::with_record(PersistedRecord::with_token(
            "client-abc",
            Token {
                access_token: "AT1".to_string(),
                refresh_token: "RT1".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Utc::now() + Duration::seconds(3600),
                scope: ["smartWrite".to_string()].into_iter().collect(),
            },
        )));
        let session = Arc::new(SessionManager::new(context, store));
        session.restore().await.unwrap();

        let api_base = Url::parse(&format!("{}/1", server.uri())).unwrap();
        ThermostatClient::new(session, &api_base, selection).unwrap()
    }

    fn body_param(request: &Request) -> Value {
        let raw = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "body")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_hold_params() {
        let next = Hold {
            temperature: 68.5,
            duration_hours: None,
        }
        .params();
        assert_eq!(next["holdType"], "nextTransition");
        assert_eq!(next["heatHoldTemp"], 685);
        assert_eq!(next["coolHoldTemp"], 685);
        assert!(next.get("holdHours").is_none());

        let timed = Hold {
            temperature: 70.0,
            duration_hours: Some(2),
        }
        .params();
        assert_eq!(timed["holdType"], "holdHours");
        assert_eq!(timed["holdHours"], 2);
        assert_eq!(timed["heatHoldTemp"], 700);
    }

    #[test]
    fn test_hold_temperature_rounds_to_nearest_tenth() {
        assert_eq!(to_tenths(68.46), 685);
        assert_eq!(to_tenths(68.44), 684);
        assert_eq!(to_tenths(-2.0), -20);
    }

    #[tokio::test]
    async fn test_non_finite_hold_is_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/thermostat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"code": 0}})))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        for temperature in [f64::NAN, f64::INFINITY] {
            let err = client
                .set_hold(Hold {
                    temperature,
                    duration_hours: None,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, ThermostatError::InvalidTemperature(_)));
        }
    }

    #[test]
    fn test_selection_json() {
        let registered = Selection::from_id(None).to_json(true);
        assert_eq!(registered["selectionType"], "registered");
        assert_eq!(registered["includeRuntime"], true);

        let single = Selection::from_id(Some("511876645706")).to_json(false);
        assert_eq!(single["selectionType"], "thermostats");
        assert_eq!(single["selectionMatch"], "511876645706");
        assert!(single.get("includeSettings").is_none());
    }

    #[test]
    fn test_hvac_mode_wire_names() {
        assert_eq!(
            serde_json::to_value(HvacMode::AuxHeatOnly).unwrap(),
            json!("auxHeatOnly")
        );
        assert_eq!(HvacMode::Heat.to_string(), "heat");
    }

    #[tokio::test]
    async fn test_status_converts_tenths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/thermostat"))
            .and(query_param("format", "json"))
            .and(header("authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::from_id(Some("511876645706"))).await;
        let statuses = client.status().await.unwrap();

        assert_eq!(statuses.len(), 1);
        let status = &statuses[0];
        assert_eq!(status.hvac_mode, "heat");
        assert_eq!(status.actual_temperature, 68.4);
        assert_eq!(status.desired_heat, 69.0);
        assert_eq!(status.heat_range, (45.0, 79.0));
        assert!(status.to_string().contains("current temp: 68.4"));

        let requests = server.received_requests().await.unwrap();
        let body = body_param(&requests[0]);
        assert_eq!(body["selection"]["selectionMatch"], "511876645706");
        assert_eq!(body["selection"]["includeSettings"], true);
    }

    #[tokio::test]
    async fn test_set_mode_posts_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/thermostat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": {"code": 0, "message": ""}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        client.set_mode(HvacMode::Cool).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = body_param(&requests[0]);
        assert_eq!(body["thermostat"]["settings"]["hvacMode"], "cool");
    }

    #[tokio::test]
    async fn test_resume_program_function() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/thermostat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": {"code": 0}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        client.resume_program().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = body_param(&requests[0]);
        assert_eq!(body["functions"][0]["type"], "resumeProgram");
        assert_eq!(body["functions"][0]["params"]["resumeAll"], false);
    }

    #[tokio::test]
    async fn test_api_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/thermostat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "status": {"code": 3, "message": "Validation Error. Invalid hold temperature."}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        let err = client
            .set_hold(Hold {
                temperature: 120.0,
                duration_hours: None,
            })
            .await
            .unwrap_err();
        match err {
            ThermostatError::Api { code, message } => {
                assert_eq!(code, 3);
                assert!(message.contains("Invalid hold"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_token_status_refreshes_and_replays() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/thermostat"))
            .and(header("authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "status": {"code": 14, "message": "Authentication token has expired."}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "AT2",
                "refresh_token": "RT2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/thermostat"))
            .and(header("authorization", "Bearer AT2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        let statuses = client.status().await.unwrap();
        assert_eq!(statuses[0].name, "Upstairs");
    }

    #[tokio::test]
    async fn test_concurrent_expired_token_statuses_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/thermostat"))
            .and(header("authorization", "Bearer AT1"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({
                        "status": {"code": 14, "message": "Authentication token has expired."}
                    }))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "AT2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/thermostat"))
            .and(header("authorization", "Bearer AT2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"code": 0}})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        let (resumed, moded) = tokio::join!(client.resume_program(), client.set_mode(HvacMode::Heat));
        resumed.unwrap();
        moded.unwrap();

        let token_hits = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/token")
            .count();
        assert_eq!(token_hits, 1);
    }

    #[tokio::test]
    async fn test_empty_list_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/thermostat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "thermostatList": [],
                "status": {"code": 0}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Selection::Registered).await;
        assert!(matches!(
            client.status().await,
            Err(ThermostatError::NotFound)
        ));
    }
}
