#![allow(dead_code)]

use bdx_core::crypto::secret::{CLIENT_IDENTITY, derive_credential};
use bdx_core::remote::{
    ChannelInfo, ChannelSpec, ControlPlane, DataPlane, FetchError, Record, RecordFetcher,
    RemoteError,
};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

/// Writes `<dir>/<name>` as a zip with one entry holding `body`.
pub fn write_archive(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    zip.start_file("snapshot.json", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(body).unwrap();
    zip.finish().unwrap();
    path
}

pub fn write_empty_archive(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let zip = zip::ZipWriter::new(File::create(&path).unwrap());
    zip.finish().unwrap();
    path
}

/// Pseudo-JSON snapshot body with one record per key.
pub fn snapshot(keys: &[&str]) -> Vec<u8> {
    let mut out = b"{".to_vec();
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(format!("\r\n\t\"{k}\":{{\"n\":{i}}}").as_bytes());
    }
    out.extend_from_slice(b"\r\n}");
    out
}

/// Fetcher answering from a fixed table; unknown keys are NotFound.
#[derive(Default)]
pub struct ScriptedFetcher {
    answers: HashMap<(String, String), Result<Record, FetchError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(mut self, table: &str, key: &str, value: Record) -> Self {
        self.answers
            .insert((table.to_string(), key.to_string()), Ok(value));
        self
    }

    pub fn failing(mut self, table: &str, key: &str, msg: &str) -> Self {
        self.answers.insert(
            (table.to_string(), key.to_string()),
            Err(FetchError::Transient(msg.to_string())),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl RecordFetcher for ScriptedFetcher {
    fn fetch(&self, table: &str, key: &str) -> Result<Record, FetchError> {
        self.calls.lock().unwrap().push(format!("{table}:{key}"));
        self.answers
            .get(&(table.to_string(), key.to_string()))
            .cloned()
            .unwrap_or(Err(FetchError::NotFound))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    List(Vec<String>),
    Create(String),
    Delete(String),
    Authenticate(String),
}

#[derive(Default)]
struct FakeState {
    visible: BTreeMap<String, ChannelSpec>,
    // name -> remaining list calls before the change shows up
    pending_create: Option<(ChannelSpec, usize)>,
    pending_delete: Option<(String, usize)>,
    auth_failures_left: usize,
    events: Vec<Event>,
}

/// Control plane whose writes become visible only after `lag` list calls.
pub struct LaggyStore {
    lag: usize,
    tables: Vec<String>,
    reject_auth: bool,
    list_error: Option<RemoteError>,
    state: Mutex<FakeState>,
    pub fetcher: Arc<ScriptedFetcher>,
}

impl LaggyStore {
    pub fn new(lag: usize, tables: &[&str]) -> Self {
        Self {
            lag,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            reject_auth: false,
            list_error: None,
            state: Mutex::new(FakeState::default()),
            fetcher: Arc::new(ScriptedFetcher::new()),
        }
    }

    pub fn with_stale(self, name: &str, secret: &str) -> Self {
        self.state.lock().unwrap().visible.insert(
            name.to_string(),
            ChannelSpec {
                name: name.to_string(),
                description: "left over".to_string(),
                auth_method: bdx_core::remote::AuthMethod::SharedSecret,
                permissions: BTreeMap::new(),
                shared_secret: secret.to_string(),
            },
        );
        self
    }

    /// The next `n` list calls fail with an access error.
    pub fn with_auth_failures(self, n: usize) -> Self {
        self.state.lock().unwrap().auth_failures_left = n;
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn with_list_error(mut self, e: RemoteError) -> Self {
        self.list_error = Some(e);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn visible(&self) -> BTreeMap<String, ChannelSpec> {
        self.state.lock().unwrap().visible.clone()
    }

    pub fn has_pending_create(&self) -> bool {
        self.state.lock().unwrap().pending_create.is_some()
    }
}

impl ControlPlane for LaggyStore {
    fn list_channels(&self) -> Result<Vec<ChannelInfo>, RemoteError> {
        if let Some(e) = &self.list_error {
            return Err(e.clone());
        }
        let mut st = self.state.lock().unwrap();
        if st.auth_failures_left > 0 {
            st.auth_failures_left -= 1;
            return Err(RemoteError::Auth("session not ready".into()));
        }
        if let Some((spec, left)) = st.pending_create.take() {
            if left == 0 {
                st.visible.insert(spec.name.clone(), spec);
            } else {
                st.pending_create = Some((spec, left - 1));
            }
        }
        if let Some((name, left)) = st.pending_delete.take() {
            if left == 0 {
                st.visible.remove(&name);
            } else {
                st.pending_delete = Some((name, left - 1));
            }
        }
        let names: Vec<String> = st.visible.keys().cloned().collect();
        st.events.push(Event::List(names.clone()));
        Ok(names.into_iter().map(|name| ChannelInfo { name }).collect())
    }

    fn create_channel(&self, spec: &ChannelSpec) -> Result<(), RemoteError> {
        let mut st = self.state.lock().unwrap();
        if st.visible.contains_key(&spec.name) {
            return Err(RemoteError::Other(format!("{} exists", spec.name)));
        }
        st.events.push(Event::Create(spec.name.clone()));
        st.pending_create = Some((spec.clone(), self.lag));
        Ok(())
    }

    fn delete_channel(&self, name: &str) -> Result<(), RemoteError> {
        let mut st = self.state.lock().unwrap();
        st.events.push(Event::Delete(name.to_string()));
        if st
            .pending_create
            .as_ref()
            .is_some_and(|(s, _)| s.name == name)
        {
            st.pending_create = None;
            return Ok(());
        }
        if !st.visible.contains_key(name) {
            return Err(RemoteError::NotFound(name.to_string()));
        }
        st.pending_delete = Some((name.to_string(), self.lag));
        Ok(())
    }

    fn list_tables(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.tables.clone())
    }
}

impl DataPlane for LaggyStore {
    fn authenticate(
        &self,
        channel: &str,
        credential: &str,
    ) -> Result<Arc<dyn RecordFetcher>, RemoteError> {
        let mut st = self.state.lock().unwrap();
        st.events.push(Event::Authenticate(channel.to_string()));
        let spec = st
            .visible
            .get(channel)
            .ok_or_else(|| RemoteError::NotFound(channel.to_string()))?;
        if self.reject_auth || derive_credential(&spec.shared_secret, CLIENT_IDENTITY) != credential
        {
            return Err(RemoteError::Auth("bad credential".into()));
        }
        Ok(self.fetcher.clone())
    }
}
