use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::config::FirebaseConfig;
use crate::error::AppLockError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One child of the remote collection, fields as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppRecord {
    pub package_name: String,
    pub name: String,
    pub icon: String,
    pub interval: String,
    pub pin_code: String,
}

pub trait CollectionListener {
    /// Called with the complete collection every time it changes.
    fn on_data_change(&mut self, records: Vec<AppRecord>);
    /// Called once when the subscription ends. No more snapshots follow.
    fn on_cancelled(&mut self, error: AppLockError);
}

pub trait RemoteCollection {
    /// Blocks for the lifetime of the subscription.
    fn subscribe(&self, listener: &mut dyn CollectionListener);
}

/// A collection in a Firebase Realtime Database, read over the REST API.
pub struct FirebaseCollection {
    url: String,
    auth: Option<String>,
    http: Client,
    stream_http: Client,
}

impl FirebaseCollection {
    pub fn new(config: &FirebaseConfig) -> Result<Self, AppLockError> {
        if config.database_url.trim().is_empty() {
            return Err(AppLockError::NotConfigured);
        }
        let url = format!(
            "{}/{}.json",
            config.database_url.trim().trim_end_matches('/'),
            config.collection.trim_matches('/')
        );

        Ok(Self {
            url,
            auth: config.auth.clone(),
            http: Client::builder().timeout(FETCH_TIMEOUT).build()?,
            stream_http: Client::builder().timeout(None).build()?,
        })
    }

    fn request(&self, client: &Client) -> RequestBuilder {
        let builder = client.get(self.url.as_str());
        match &self.auth {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    pub fn fetch(&self) -> Result<Vec<AppRecord>, AppLockError> {
        let resp = check_status(self.request(&self.http).send()?)?;
        let snapshot: Value = serde_json::from_str(resp.text()?.as_str())?;
        Ok(parse_snapshot(&snapshot))
    }

    fn open_stream(&self) -> Result<Response, AppLockError> {
        let resp = self
            .request(&self.stream_http)
            .header(ACCEPT, "text/event-stream")
            .send()?;
        check_status(resp)
    }
}

impl RemoteCollection for FirebaseCollection {
    fn subscribe(&self, listener: &mut dyn CollectionListener) {
        match self.open_stream() {
            Ok(resp) => dispatch_stream(BufReader::new(resp), || self.fetch(), listener),
            Err(e) => listener.on_cancelled(e),
        }
    }
}

fn check_status(resp: Response) -> Result<Response, AppLockError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(AppLockError::HttpStatus { status, body })
}

/// Feeds a server-sent event stream to `listener`, fetching the full
/// collection again on every change.
pub fn dispatch_stream<R, F>(reader: R, mut fetch: F, listener: &mut dyn CollectionListener)
where
    R: BufRead,
    F: FnMut() -> Result<Vec<AppRecord>, AppLockError>,
{
    let mut ended: Option<AppLockError> = None;

    let read = read_events(reader, |event, data| match event {
        "put" | "patch" => {
            match fetch() {
                Ok(records) => listener.on_data_change(records),
                // the next change event fetches again
                Err(e) => log::warn!("failed to fetch collection after change: {e}"),
            }
            ControlFlow::Continue(())
        }
        "keep-alive" => ControlFlow::Continue(()),
        "cancel" => {
            ended = Some(AppLockError::Cancelled(data.trim_matches('"').to_string()));
            ControlFlow::Break(())
        }
        "auth_revoked" => {
            ended = Some(AppLockError::AuthRevoked);
            ControlFlow::Break(())
        }
        other => {
            log::debug!("ignoring stream event {other}");
            ControlFlow::Continue(())
        }
    });

    let error = match (read, ended) {
        (Err(e), _) => AppLockError::Stream(e),
        (Ok(()), Some(e)) => e,
        (Ok(()), None) => AppLockError::Stream(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "event stream closed",
        )),
    };
    listener.on_cancelled(error);
}

/*
event: put
data: {"path":"/","data":{"a":{"name":"A"}}}

event: keep-alive
data: null

*/
fn read_events<R, F>(reader: R, mut on_event: F) -> std::io::Result<()>
where
    R: BufRead,
    F: FnMut(&str, &str) -> ControlFlow<()>,
{
    let mut event = String::new();
    let mut data = String::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            if !event.is_empty() && on_event(event.as_str(), data.as_str()).is_break() {
                return Ok(());
            }
            event.clear();
            data.clear();
        } else if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim_start());
        }
    }

    Ok(())
}

/// Turns a collection snapshot into records. Objects are read in key order;
/// arrays (sequential integer keys) skip their empty slots.
pub fn parse_snapshot(snapshot: &Value) -> Vec<AppRecord> {
    let children: Vec<&Value> = match snapshot {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().filter(|v| !v.is_null()).collect(),
        _ => Vec::new(),
    };

    children
        .into_iter()
        .filter(|child| child.is_object())
        .map(|child| AppRecord {
            package_name: string_field(child, "package_name"),
            name: string_field(child, "name"),
            icon: string_field(child, "icon"),
            interval: string_field(child, "interval"),
            pin_code: string_field(child, "pin_code"),
        })
        .collect()
}

fn string_field(child: &Value, key: &str) -> String {
    match child.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recorder {
        snapshots: Vec<Vec<AppRecord>>,
        cancelled: Vec<String>,
    }

    impl CollectionListener for Recorder {
        fn on_data_change(&mut self, records: Vec<AppRecord>) {
            self.snapshots.push(records);
        }

        fn on_cancelled(&mut self, error: AppLockError) {
            self.cancelled.push(error.to_string());
        }
    }

    fn record(package: &str) -> AppRecord {
        AppRecord {
            package_name: package.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn object_snapshot_reads_every_field() {
        let snapshot = json!({
            "-Nb2": {"package_name": "com.b", "name": "B", "icon": "", "interval": "15", "pin_code": "0000"},
            "-Na1": {"package_name": "com.a", "name": "A", "icon": "aWNvbg==", "interval": "30", "pin_code": "1234"},
        });

        let records = parse_snapshot(&snapshot);

        assert_eq!(
            records,
            vec![
                AppRecord {
                    package_name: "com.a".into(),
                    name: "A".into(),
                    icon: "aWNvbg==".into(),
                    interval: "30".into(),
                    pin_code: "1234".into(),
                },
                AppRecord {
                    package_name: "com.b".into(),
                    name: "B".into(),
                    icon: "".into(),
                    interval: "15".into(),
                    pin_code: "0000".into(),
                },
            ]
        );
    }

    #[test]
    fn missing_fields_become_empty_and_numbers_become_text() {
        let records = parse_snapshot(&json!({"k": {"package_name": "com.a", "interval": 30}}));
        assert_eq!(records[0].interval, "30");
        assert_eq!(records[0].name, "");
        assert_eq!(records[0].pin_code, "");
    }

    #[test]
    fn array_snapshot_skips_holes() {
        let snapshot = json!([null, {"package_name": "com.a"}, null, {"package_name": "com.b"}]);
        let packages: Vec<_> = parse_snapshot(&snapshot)
            .into_iter()
            .map(|r| r.package_name)
            .collect();
        assert_eq!(packages, vec!["com.a", "com.b"]);
    }

    #[test]
    fn empty_collection_is_null() {
        assert!(parse_snapshot(&Value::Null).is_empty());
    }

    #[test]
    fn every_change_delivers_a_full_refetch() {
        let stream = "event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n\
                      event: keep-alive\ndata: null\n\n\
                      event: patch\ndata: {\"path\":\"/x\",\"data\":{}}\n\n";
        let mut fetches = vec![vec![record("com.a"), record("com.b")], vec![record("com.c")]].into_iter();
        let mut recorder = Recorder::default();

        dispatch_stream(
            Cursor::new(stream),
            || Ok(fetches.next().unwrap_or_default()),
            &mut recorder,
        );

        assert_eq!(
            recorder.snapshots,
            vec![vec![record("com.a"), record("com.b")], vec![record("com.c")]]
        );
        assert_eq!(recorder.cancelled.len(), 1);
    }

    #[test]
    fn cancel_event_ends_subscription() {
        let stream = "event: cancel\ndata: \"Permission denied\"\n\n\
                      event: put\ndata: {}\n\n";
        let mut recorder = Recorder::default();

        dispatch_stream(Cursor::new(stream), || Ok(vec![record("com.a")]), &mut recorder);

        assert!(recorder.snapshots.is_empty());
        assert_eq!(
            recorder.cancelled,
            vec!["remote listener cancelled by server: Permission denied".to_string()]
        );
    }

    #[test]
    fn auth_revoked_ends_subscription() {
        let stream = "event: auth_revoked\ndata: \"credential is no longer valid\"\n\n";
        let mut recorder = Recorder::default();

        dispatch_stream(Cursor::new(stream), || Ok(vec![]), &mut recorder);

        assert_eq!(recorder.cancelled, vec!["remote auth revoked".to_string()]);
    }

    #[test]
    fn failed_refetch_keeps_listening() {
        let stream = "event: put\ndata: {}\n\nevent: put\ndata: {}\n\n";
        let mut attempt = 0;
        let mut recorder = Recorder::default();

        dispatch_stream(
            Cursor::new(stream),
            || {
                attempt += 1;
                if attempt == 1 {
                    Err(AppLockError::NotConfigured)
                } else {
                    Ok(vec![record("com.a")])
                }
            },
            &mut recorder,
        );

        assert_eq!(recorder.snapshots, vec![vec![record("com.a")]]);
    }

    #[test]
    fn unconfigured_database_is_rejected() {
        assert!(matches!(
            FirebaseCollection::new(&FirebaseConfig::default()),
            Err(AppLockError::NotConfigured)
        ));
    }
}
