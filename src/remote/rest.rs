//! REST client for the hosted patient database.
//!
//! Speaks PostgREST conventions: embedded selects for joins, `eq.` filters,
//! and `Prefer: return=representation` so writes echo the affected rows.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{PatientService, ServiceError};
use crate::config::StoreConfig;
use crate::models::{NewPatient, Patient, PatientUpdate};

/// Table endpoint, relative to the service base URL.
pub const PATIENTS_PATH: &str = "/rest/v1/patients";

/// Patients with admissions, and each admission's attending user name.
pub const PATIENT_SELECT: &str = "*,admissions(id,admission_date,discharge_date,department,diagnosis,status,visit_number,safety_type,users(name))";

/// Newest patients first.
pub const PATIENT_ORDER: &str = "created_at.desc";

/// HTTP client for the `patients` table.
pub struct RestPatientService {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl RestPatientService {
    /// Build a client for the service at `base_url`, authenticating with `api_key`.
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        })
    }

    /// Build a client from resolved settings.
    pub fn from_config(config: &StoreConfig) -> Result<Self, ServiceError> {
        Self::new(config.base_url(), config.api_key(), config.timeout_secs())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, PATIENTS_PATH))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_connect() {
            ServiceError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            ServiceError::Timeout(self.timeout_secs)
        } else {
            ServiceError::HttpClient(e.to_string())
        }
    }

    /// Send and turn non-2xx responses into `ServiceError::Remote`.
    async fn execute(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(status, &body);
        tracing::debug!(status = status.as_u16(), %message, "Patient service rejected request");
        Err(ServiceError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn rows(response: Response) -> Result<Vec<Patient>, ServiceError> {
        response
            .json::<Vec<Patient>>()
            .await
            .map_err(|e| ServiceError::ResponseParsing(e.to_string()))
    }
}

/// Error body PostgREST sends with non-2xx responses.
#[derive(Deserialize)]
struct PostgrestError {
    message: String,
    #[serde(default)]
    details: Option<String>,
}

/// Human-readable message for a failed response. Never empty.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<PostgrestError>(body) {
        let message = err.message.trim();
        if !message.is_empty() {
            return match err.details.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
                Some(details) => format!("{message} ({details})"),
                None => message.to_string(),
            };
        }
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    format!("HTTP {status}")
}

fn id_filter(id: i64) -> [(&'static str, String); 1] {
    [("id", format!("eq.{id}"))]
}

#[async_trait]
impl PatientService for RestPatientService {
    async fn list_patients(&self) -> Result<Vec<Patient>, ServiceError> {
        tracing::debug!(base_url = %self.base_url, "Listing patients");
        let request = self
            .request(Method::GET)
            .query(&[("select", PATIENT_SELECT), ("order", PATIENT_ORDER)]);

        let response = self.execute(request).await?;
        Self::rows(response).await
    }

    async fn create_patient(&self, input: &NewPatient) -> Result<Patient, ServiceError> {
        tracing::debug!("Creating patient");
        let request = self
            .request(Method::POST)
            .header("Prefer", "return=representation")
            .json(input);

        let response = self.execute(request).await?;
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::ResponseParsing("create returned no rows".into()))
    }

    async fn update_patient(
        &self,
        id: i64,
        update: &PatientUpdate,
    ) -> Result<Patient, ServiceError> {
        tracing::debug!(id, "Updating patient");
        let request = self
            .request(Method::PATCH)
            .query(&id_filter(id))
            .header("Prefer", "return=representation")
            .json(update);

        let response = self.execute(request).await?;
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or(ServiceError::NotFound(id))
    }

    async fn delete_patient(&self, id: i64) -> Result<(), ServiceError> {
        tracing::debug!(id, "Deleting patient");
        let request = self
            .request(Method::DELETE)
            .query(&id_filter(id))
            .header("Prefer", "return=representation");

        let response = self.execute(request).await?;
        if Self::rows(response).await?.is_empty() {
            return Err(ServiceError::NotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const TEST_KEY: &str = "test-anon-key";

    // -- Fake PostgREST table -------------------------------------------------

    #[derive(Clone, Default)]
    struct FakeTable {
        rows: Arc<Mutex<Vec<Value>>>,
        last_query: Arc<Mutex<HashMap<String, String>>>,
        last_prefer: Arc<Mutex<Option<String>>>,
        failure: Arc<Mutex<Option<(StatusCode, String)>>>,
    }

    impl FakeTable {
        fn with_rows(rows: Vec<Value>) -> Self {
            let table = Self::default();
            *table.rows.lock().unwrap() = rows;
            table
        }

        fn fail_with(&self, status: StatusCode, body: &str) {
            *self.failure.lock().unwrap() = Some((status, body.to_string()));
        }
    }

    fn reject(table: &FakeTable, headers: &HeaderMap) -> Option<AxumResponse> {
        let key = headers.get("apikey").and_then(|v| v.to_str().ok());
        let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
        if key != Some(TEST_KEY) || bearer != Some(&format!("Bearer {TEST_KEY}")[..]) {
            let body = json!({ "message": "Invalid API key", "hint": "check apikey header" });
            return Some((StatusCode::UNAUTHORIZED, Json(body)).into_response());
        }
        *table.last_prefer.lock().unwrap() = headers
            .get("prefer")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        if let Some((status, body)) = table.failure.lock().unwrap().clone() {
            return Some((status, body).into_response());
        }
        None
    }

    fn requested_id(query: &HashMap<String, String>) -> Option<i64> {
        query.get("id")?.strip_prefix("eq.")?.parse().ok()
    }

    async fn list(
        State(table): State<FakeTable>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> AxumResponse {
        if let Some(resp) = reject(&table, &headers) {
            return resp;
        }
        *table.last_query.lock().unwrap() = query;
        Json(table.rows.lock().unwrap().clone()).into_response()
    }

    async fn create(
        State(table): State<FakeTable>,
        headers: HeaderMap,
        Json(mut body): Json<Value>,
    ) -> AxumResponse {
        if let Some(resp) = reject(&table, &headers) {
            return resp;
        }
        let mut rows = table.rows.lock().unwrap();
        body["id"] = json!(100 + rows.len() as i64);
        body["created_at"] = json!("2025-06-01T12:00:00+00:00");
        rows.push(body.clone());
        (StatusCode::CREATED, Json(vec![body])).into_response()
    }

    async fn update(
        State(table): State<FakeTable>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> AxumResponse {
        if let Some(resp) = reject(&table, &headers) {
            return resp;
        }
        let id = requested_id(&query);
        let mut rows = table.rows.lock().unwrap();
        let mut changed = Vec::new();
        for row in rows.iter_mut().filter(|r| r["id"].as_i64() == id) {
            if let (Some(target), Some(fields)) = (row.as_object_mut(), body.as_object()) {
                for (k, v) in fields {
                    target.insert(k.clone(), v.clone());
                }
            }
            changed.push(row.clone());
        }
        Json(changed).into_response()
    }

    async fn remove(
        State(table): State<FakeTable>,
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
    ) -> AxumResponse {
        if let Some(resp) = reject(&table, &headers) {
            return resp;
        }
        let id = requested_id(&query);
        let mut rows = table.rows.lock().unwrap();
        let (removed, kept): (Vec<Value>, Vec<Value>) =
            rows.drain(..).partition(|r| r["id"].as_i64() == id);
        *rows = kept;
        Json(removed).into_response()
    }

    async fn serve(table: FakeTable) -> String {
        let app = Router::new()
            .route(
                PATIENTS_PATH,
                get(list).post(create).patch(update).delete(remove),
            )
            .with_state(table);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn seeded_rows() -> Vec<Value> {
        vec![
            json!({
                "id": 7,
                "created_at": "2024-02-01T10:00:00+00:00",
                "first_name": "Ada",
                "last_name": "Mensah",
                "admissions": [
                    { "id": 1, "admission_date": "2024-01-01", "users": { "name": "Dr. Old" } },
                    { "id": 2, "admission_date": "2024-03-15", "users": { "name": "Dr. New" } }
                ]
            }),
            json!({
                "id": 8,
                "created_at": "2024-01-20T10:00:00+00:00",
                "first_name": "Tomas",
                "last_name": "Berg",
                "admissions": []
            }),
        ]
    }

    async fn client_for(table: FakeTable) -> (RestPatientService, FakeTable) {
        let url = serve(table.clone()).await;
        (RestPatientService::new(&url, TEST_KEY, 5).unwrap(), table)
    }

    // -- Requests -------------------------------------------------------------

    #[tokio::test]
    async fn list_requests_joined_select_newest_first() {
        let (client, table) = client_for(FakeTable::with_rows(seeded_rows())).await;

        let patients = client.list_patients().await.unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].id, 7);
        assert_eq!(patients[0].admissions.len(), 2);
        assert_eq!(patients[1].field("last_name"), Some(&json!("Berg")));

        let query = table.last_query.lock().unwrap().clone();
        assert_eq!(query.get("select").map(String::as_str), Some(PATIENT_SELECT));
        assert_eq!(query.get("order").map(String::as_str), Some("created_at.desc"));
    }

    #[tokio::test]
    async fn create_returns_representation() {
        let (client, table) = client_for(FakeTable::default()).await;

        let created = client
            .create_patient(&NewPatient::new("Ada", "Mensah"))
            .await
            .unwrap();
        assert_eq!(created.id, 100);
        assert!(created.created_at.is_some());
        assert_eq!(created.field("first_name"), Some(&json!("Ada")));
        assert_eq!(
            table.last_prefer.lock().unwrap().as_deref(),
            Some("return=representation")
        );
        assert_eq!(table.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_sends_only_changed_fields() {
        let (client, table) = client_for(FakeTable::with_rows(seeded_rows())).await;

        let update = PatientUpdate {
            phone: Some("555-0100".into()),
            ..Default::default()
        };
        let updated = client.update_patient(8, &update).await.unwrap();
        assert_eq!(updated.id, 8);
        assert_eq!(updated.field("phone"), Some(&json!("555-0100")));
        assert_eq!(updated.field("first_name"), Some(&json!("Tomas")));

        let rows = table.rows.lock().unwrap();
        assert_eq!(rows[0].get("phone"), None);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let (client, _table) = client_for(FakeTable::with_rows(seeded_rows())).await;

        let update = PatientUpdate {
            phone: Some("555-0100".into()),
            ..Default::default()
        };
        let err = client.update_patient(404, &update).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(404)));
        assert_eq!(err.to_string(), "No patient found with id 404");
    }

    #[tokio::test]
    async fn delete_removes_row_and_reports_missing() {
        let (client, table) = client_for(FakeTable::with_rows(seeded_rows())).await;

        client.delete_patient(7).await.unwrap();
        assert_eq!(table.rows.lock().unwrap().len(), 1);

        let err = client.delete_patient(7).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(7)));
    }

    // -- Failures -------------------------------------------------------------

    #[tokio::test]
    async fn wrong_key_surfaces_service_message() {
        let url = serve(FakeTable::with_rows(seeded_rows())).await;
        let client = RestPatientService::new(&url, "wrong-key", 5).unwrap();

        let err = client.list_patients().await.unwrap_err();
        match err {
            ServiceError::Remote { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API key");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_text_error_body_is_used_verbatim() {
        let table = FakeTable::default();
        table.fail_with(StatusCode::BAD_GATEWAY, "upstream unavailable");
        let (client, _table) = client_for(table).await;

        let err = client.list_patients().await.unwrap_err();
        assert_eq!(err.to_string(), "upstream unavailable");
    }

    #[tokio::test]
    async fn malformed_rows_are_parse_errors() {
        let (client, _table) =
            client_for(FakeTable::with_rows(vec![json!({ "name": "no id" })])).await;

        let err = client.list_patients().await.unwrap_err();
        assert!(matches!(err, ServiceError::ResponseParsing(_)));
    }

    #[tokio::test]
    async fn refused_connection_maps_to_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RestPatientService::new(&format!("http://{addr}"), TEST_KEY, 5).unwrap();
        let err = client.list_patients().await.unwrap_err();
        assert!(matches!(err, ServiceError::Connection(_)), "got {err:?}");
    }

    // -- Helpers --------------------------------------------------------------

    #[test]
    fn error_message_prefers_postgrest_body() {
        let body = r#"{"code":"23502","message":"null value in column \"last_name\"","details":"Failing row contains (9, Ada, null)."}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "null value in column \"last_name\" (Failing row contains (9, Ada, null).)"
        );
    }

    #[test]
    fn error_message_falls_back_to_status() {
        assert_eq!(
            error_message(StatusCode::SERVICE_UNAVAILABLE, "  "),
            "HTTP 503 Service Unavailable"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"message":""}"#),
            r#"{"message":""}"#
        );
    }

    #[test]
    fn constructor_trims_trailing_slash() {
        let client = RestPatientService::new("http://localhost:54321/", TEST_KEY, 10).unwrap();
        assert_eq!(client.base_url(), "http://localhost:54321");
    }

    #[test]
    fn from_config_uses_configured_url() {
        let cfg = StoreConfig::new("https://records.example.org", TEST_KEY, 10).unwrap();
        let client = RestPatientService::from_config(&cfg).unwrap();
        assert_eq!(client.base_url(), "https://records.example.org");
        assert_eq!(client.timeout_secs, 10);
    }
}
