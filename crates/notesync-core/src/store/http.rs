use super::{Record, RecordStore, RecordUpdate};
use crate::config::{FieldNames, StoreConfig};
use crate::error::{NotesyncError, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Seconds to wait on a 429 that carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RawRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<RawRecord>,
}

/// Blocking client for an Airtable-style REST table.
///
/// The service has no revision tokens, so the compare-and-swap in
/// [`RecordStore::write`] re-reads the record and compares notes before
/// patching. A writer landing between that read and the patch is not caught.
pub struct HttpRecordStore {
    client: Client,
    table_url: Url,
    token: String,
    fields: FieldNames,
}

impl HttpRecordStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let token = config.api_token()?.to_string();
        let timeout = (config.timeout_secs > 0).then(|| config.timeout());
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            table_url: table_url(config)?,
            token,
            fields: config.fields.clone(),
        })
    }

    fn record_url(&self, record_id: &str) -> Url {
        let mut url = self.table_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(record_id);
        }
        url
    }

    fn send(&self, request: RequestBuilder, task_id: &str) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()?;
        debug!(status = %response.status(), task_id, "record store response");

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND => Err(NotesyncError::RecordNotFound(task_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(NotesyncError::Unauthorized {
                status: status.as_u16(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Err(NotesyncError::RateLimited { retry_after_secs })
            }
            _ => {
                let body = response.text().unwrap_or_default();
                Err(NotesyncError::Api {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    fn field_text(&self, fields: &Map<String, Value>, name: &str) -> Option<String> {
        match fields.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn to_record(&self, raw: RawRecord, task_id: &str) -> Record {
        Record {
            task_id: self
                .field_text(&raw.fields, &self.fields.task_id)
                .unwrap_or_else(|| task_id.to_string()),
            status: self.field_text(&raw.fields, &self.fields.status),
            // The service omits empty fields entirely.
            notes: self
                .field_text(&raw.fields, &self.fields.notes)
                .unwrap_or_default(),
            id: raw.id,
        }
    }

    fn fetch_by_id(&self, record_id: &str, task_id: &str) -> Result<Record> {
        debug!(record_id, task_id, "fetching record");
        let response = self.send(self.client.get(self.record_url(record_id)), task_id)?;
        let raw: RawRecord = response.json()?;
        Ok(self.to_record(raw, task_id))
    }
}

fn table_url(config: &StoreConfig) -> Result<Url> {
    let invalid = || NotesyncError::InvalidConfig(format!("bad store.base_url '{}'", config.base_url));
    let mut url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .push(&config.base_id)
        .push(&config.table);
    Ok(url)
}

/// Formula selecting records whose task field equals `task_id`.
fn filter_formula(field: &str, task_id: &str) -> String {
    let escaped = task_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("{{{field}}}='{escaped}'")
}

impl RecordStore for HttpRecordStore {
    fn find(&self, task_id: &str) -> Result<Record> {
        let formula = filter_formula(&self.fields.task_id, task_id);
        debug!(task_id, %formula, "looking up record");
        let request = self
            .client
            .get(self.table_url.clone())
            .query(&[("filterByFormula", formula.as_str()), ("maxRecords", "2")]);
        let list: RecordList = self.send(request, task_id)?.json()?;

        let mut records = list.records.into_iter();
        let raw = records
            .next()
            .ok_or_else(|| NotesyncError::RecordNotFound(task_id.to_string()))?;
        if records.next().is_some() {
            return Err(NotesyncError::DuplicateRecord(task_id.to_string()));
        }
        Ok(self.to_record(raw, task_id))
    }

    fn write(&self, record: &Record, update: &RecordUpdate) -> Result<()> {
        let current = self.fetch_by_id(&record.id, &record.task_id)?;
        if current.notes != record.notes {
            return Err(NotesyncError::Conflict(record.task_id.clone()));
        }

        let mut fields = Map::new();
        fields.insert(self.fields.notes.clone(), Value::String(update.notes.clone()));
        if let Some(status) = update.status {
            fields.insert(
                self.fields.status.clone(),
                Value::String(status.field_value().to_string()),
            );
        }
        let body = serde_json::json!({ "fields": fields });

        debug!(record_id = %record.id, task_id = %record.task_id, "patching record");
        self.send(
            self.client.patch(self.record_url(&record.id)).json(&body),
            &record.task_id,
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::status::Status;
    use mockito::{Matcher, Server};

    fn store_for(server: &Server) -> HttpRecordStore {
        let mut cfg = Config::new("app1", "Tasks");
        cfg.store.base_url = server.url();
        cfg.store.api_token = Some("tok".to_string());
        HttpRecordStore::new(&cfg.store).unwrap()
    }

    fn record_json(id: &str, notes: Option<&str>) -> String {
        let mut fields = serde_json::json!({ "task_id": "T1", "status": "Planned" });
        if let Some(n) = notes {
            fields["notes"] = Value::String(n.to_string());
        }
        serde_json::json!({ "id": id, "fields": fields }).to_string()
    }

    #[test]
    fn filter_formula_escapes_quotes() {
        assert_eq!(filter_formula("task_id", "T1"), "{task_id}='T1'");
        assert_eq!(filter_formula("id", "it's"), "{id}='it\\'s'");
    }

    #[test]
    fn table_url_encodes_segments() {
        let mut cfg = Config::new("app1", "My Tasks");
        cfg.store.base_url = "https://api.example.com/v0/".to_string();
        let url = table_url(&cfg.store).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v0/app1/My%20Tasks");
    }

    #[test]
    fn new_requires_token() {
        let cfg = Config::new("app1", "Tasks");
        assert!(matches!(
            HttpRecordStore::new(&cfg.store),
            Err(NotesyncError::MissingCredential(_))
        ));
    }

    #[test]
    fn find_reads_fields() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::UrlEncoded(
                "filterByFormula".into(),
                "{task_id}='T1'".into(),
            ))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"records":[{}]}}"#, record_json("rec1", Some("old"))))
            .create();

        let record = store_for(&server).find("T1").unwrap();
        mock.assert();
        assert_eq!(record.id, "rec1");
        assert_eq!(record.task_id, "T1");
        assert_eq!(record.status.as_deref(), Some("Planned"));
        assert_eq!(record.notes, "old");
    }

    #[test]
    fn find_treats_missing_notes_as_empty() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!(r#"{{"records":[{}]}}"#, record_json("rec1", None)))
            .create();

        let record = store_for(&server).find("T1").unwrap();
        assert_eq!(record.notes, "");
    }

    #[test]
    fn find_reports_missing_and_duplicate() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::UrlEncoded(
                "filterByFormula".into(),
                "{task_id}='T9'".into(),
            ))
            .with_status(200)
            .with_body(r#"{"records":[]}"#)
            .create();
        let _mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::UrlEncoded(
                "filterByFormula".into(),
                "{task_id}='T1'".into(),
            ))
            .with_status(200)
            .with_body(format!(
                r#"{{"records":[{},{}]}}"#,
                record_json("rec1", None),
                record_json("rec2", None)
            ))
            .create();

        let store = store_for(&server);
        assert!(matches!(
            store.find("T9"),
            Err(NotesyncError::RecordNotFound(_))
        ));
        assert!(matches!(
            store.find("T1"),
            Err(NotesyncError::DuplicateRecord(_))
        ));
    }

    #[test]
    fn http_errors_map_to_variants() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::UrlEncoded(
                "filterByFormula".into(),
                "{task_id}='auth'".into(),
            ))
            .with_status(401)
            .create();
        let _mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::UrlEncoded(
                "filterByFormula".into(),
                "{task_id}='busy'".into(),
            ))
            .with_status(429)
            .with_header("retry-after", "7")
            .create();
        let _mock = server
            .mock("GET", "/app1/Tasks")
            .match_query(Matcher::UrlEncoded(
                "filterByFormula".into(),
                "{task_id}='down'".into(),
            ))
            .with_status(503)
            .with_body("maintenance")
            .create();

        let store = store_for(&server);
        assert!(matches!(
            store.find("auth"),
            Err(NotesyncError::Unauthorized { status: 401 })
        ));
        assert!(matches!(
            store.find("busy"),
            Err(NotesyncError::RateLimited { retry_after_secs: 7 })
        ));
        match store.find("down") {
            Err(NotesyncError::Api { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn write_patches_notes_and_status() {
        let mut server = Server::new();
        let get = server
            .mock("GET", "/app1/Tasks/rec1")
            .with_status(200)
            .with_body(record_json("rec1", Some("old")))
            .create();
        let patch = server
            .mock("PATCH", "/app1/Tasks/rec1")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Json(serde_json::json!({
                "fields": { "notes": "new\n\nold", "status": "Completed" }
            })))
            .with_status(200)
            .with_body(record_json("rec1", Some("new\n\nold")))
            .create();

        let record = Record {
            id: "rec1".to_string(),
            task_id: "T1".to_string(),
            status: Some("Planned".to_string()),
            notes: "old".to_string(),
        };
        store_for(&server)
            .write(
                &record,
                &RecordUpdate {
                    notes: "new\n\nold".to_string(),
                    status: Some(Status::Done),
                },
            )
            .unwrap();
        get.assert();
        patch.assert();
    }

    #[test]
    fn write_detects_concurrent_edit() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/app1/Tasks/rec1")
            .with_status(200)
            .with_body(record_json("rec1", Some("someone else wrote this")))
            .create();
        let patch = server.mock("PATCH", "/app1/Tasks/rec1").expect(0).create();

        let record = Record {
            id: "rec1".to_string(),
            task_id: "T1".to_string(),
            status: None,
            notes: "old".to_string(),
        };
        let result = store_for(&server).write(
            &record,
            &RecordUpdate {
                notes: "new".to_string(),
                status: None,
            },
        );
        assert!(matches!(result, Err(NotesyncError::Conflict(_))));
        patch.assert();
    }
}
