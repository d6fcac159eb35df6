//! Directory-backed store, laid out as
//!
//! ```text
//! <root>/accounts.json                     optional: account -> hex(blake3(secret))
//! <root>/<game>/tables/<table>/<key>.json
//! <root>/<game>/channels/<name>.json       ChannelSpec
//! ```
//!
//! Used for offline runs against a mirrored store and for local testing.

use super::{
    ChannelInfo, ChannelSpec, ControlPlane, DataPlane, FetchError, Record, RecordFetcher,
    RemoteError,
};
use crate::crypto::secret::{CLIENT_IDENTITY, derive_credential};
use crate::error::{ExportError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FsStore {
    game_dir: PathBuf,
}

impl FsStore {
    /// Log in and select a game. Both failures are fatal for the run.
    pub fn login(root: &Path, account: &str, secret: &str, game: &str) -> Result<Self> {
        if !root.is_dir() {
            return Err(ExportError::Auth(format!(
                "store not reachable at {}",
                root.display()
            )));
        }
        let accounts = root.join("accounts.json");
        if accounts.is_file() {
            let bytes = fs::read(&accounts)?;
            let table: BTreeMap<String, String> = serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
            let want = hex::encode(blake3::hash(secret.as_bytes()).as_bytes());
            if table.get(account) != Some(&want) {
                return Err(ExportError::Auth(format!("bad credentials for {account}")));
            }
        }
        if !is_plain_name(game) || !root.join(game).is_dir() {
            return Err(ExportError::Auth(format!("unknown game: {game}")));
        }
        Ok(Self {
            game_dir: root.join(game),
        })
    }

    fn channels_dir(&self) -> PathBuf {
        self.game_dir.join("channels")
    }

    fn tables_dir(&self) -> PathBuf {
        self.game_dir.join("tables")
    }

    fn channel_path(&self, name: &str) -> std::result::Result<PathBuf, RemoteError> {
        if !is_plain_name(name) {
            return Err(RemoteError::Other(format!("invalid channel name: {name:?}")));
        }
        Ok(self.channels_dir().join(format!("{name}.json")))
    }
}

fn is_plain_name(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
}

fn remote_io(e: std::io::Error) -> RemoteError {
    match e.kind() {
        ErrorKind::NotFound => RemoteError::NotFound(e.to_string()),
        ErrorKind::PermissionDenied => RemoteError::Auth(e.to_string()),
        _ => RemoteError::Other(e.to_string()),
    }
}

/// File stems of `dir` entries passing `keep`; a missing dir is empty.
fn list_names(
    dir: &Path,
    keep: impl Fn(&fs::DirEntry) -> bool,
) -> std::result::Result<Vec<String>, RemoteError> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(remote_io(e)),
    };
    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.map_err(remote_io)?;
        if !keep(&entry) {
            continue;
        }
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            out.push(stem.to_string());
        }
    }
    out.sort();
    Ok(out)
}

impl ControlPlane for FsStore {
    fn list_channels(&self) -> std::result::Result<Vec<ChannelInfo>, RemoteError> {
        let names = list_names(&self.channels_dir(), |e| {
            e.path().extension().and_then(|x| x.to_str()) == Some("json")
        })?;
        Ok(names.into_iter().map(|name| ChannelInfo { name }).collect())
    }

    fn create_channel(&self, spec: &ChannelSpec) -> std::result::Result<(), RemoteError> {
        let path = self.channel_path(&spec.name)?;
        fs::create_dir_all(self.channels_dir()).map_err(remote_io)?;
        let body = serde_json::to_vec_pretty(spec).map_err(|e| RemoteError::Other(e.to_string()))?;
        let mut f = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RemoteError::Other(format!(
                    "channel {} already exists",
                    spec.name
                )));
            }
            Err(e) => return Err(remote_io(e)),
        };
        std::io::Write::write_all(&mut f, &body).map_err(remote_io)
    }

    fn delete_channel(&self, name: &str) -> std::result::Result<(), RemoteError> {
        fs::remove_file(self.channel_path(name)?).map_err(remote_io)
    }

    fn list_tables(&self) -> std::result::Result<Vec<String>, RemoteError> {
        list_names(&self.tables_dir(), |e| {
            e.file_type().map(|t| t.is_dir()).unwrap_or(false)
        })
    }
}

impl DataPlane for FsStore {
    fn authenticate(
        &self,
        channel: &str,
        credential: &str,
    ) -> std::result::Result<Arc<dyn RecordFetcher>, RemoteError> {
        let bytes = fs::read(self.channel_path(channel)?).map_err(remote_io)?;
        let spec: ChannelSpec =
            serde_json::from_slice(&bytes).map_err(|e| RemoteError::Other(e.to_string()))?;
        if derive_credential(&spec.shared_secret, CLIENT_IDENTITY) != credential {
            return Err(RemoteError::Auth(format!("bad credential for channel {channel}")));
        }
        let readable = spec
            .permissions
            .iter()
            .filter(|(_, p)| p.read)
            .map(|(t, _)| t.clone())
            .collect();
        Ok(Arc::new(FsFetcher {
            tables_dir: self.tables_dir(),
            readable,
        }))
    }
}

struct FsFetcher {
    tables_dir: PathBuf,
    readable: BTreeSet<String>,
}

impl RecordFetcher for FsFetcher {
    fn fetch(&self, table: &str, key: &str) -> std::result::Result<Record, FetchError> {
        if !self.readable.contains(table) {
            return Err(FetchError::Transient(format!("no read access to {table}")));
        }
        if !is_plain_name(key) {
            return Err(FetchError::Transient(format!("invalid key: {key:?}")));
        }
        let path = self.tables_dir.join(table).join(format!("{key}.json"));
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(FetchError::NotFound),
            Err(e) => return Err(FetchError::Transient(e.to_string())),
        };
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{AuthMethod, Permission};
    use tempfile::TempDir;

    fn store() -> (TempDir, FsStore) {
        let tmp = TempDir::new().unwrap();
        let t = tmp.path().join("game1").join("tables");
        fs::create_dir_all(t.join("players")).unwrap();
        fs::create_dir_all(t.join("items")).unwrap();
        fs::write(t.join("players").join("alice.json"), br#"{"lvl":3}"#).unwrap();
        let s = FsStore::login(tmp.path(), "user", "pw", "game1").unwrap();
        (tmp, s)
    }

    fn spec(name: &str, secret: &str) -> ChannelSpec {
        ChannelSpec {
            name: name.into(),
            description: String::new(),
            auth_method: AuthMethod::SharedSecret,
            permissions: [("players".to_string(), Permission::read_only())].into(),
            shared_secret: secret.into(),
        }
    }

    #[test]
    fn login_checks_game_and_accounts() {
        let (tmp, _) = store();
        assert!(matches!(
            FsStore::login(tmp.path(), "user", "pw", "nope"),
            Err(ExportError::Auth(_))
        ));
        let digest = hex::encode(blake3::hash(b"pw").as_bytes());
        fs::write(
            tmp.path().join("accounts.json"),
            format!(r#"{{"user":"{digest}"}}"#),
        )
        .unwrap();
        assert!(FsStore::login(tmp.path(), "user", "pw", "game1").is_ok());
        assert!(matches!(
            FsStore::login(tmp.path(), "user", "wrong", "game1"),
            Err(ExportError::Auth(_))
        ));
    }

    #[test]
    fn channel_lifecycle() {
        let (_tmp, s) = store();
        assert_eq!(s.list_tables().unwrap(), vec!["items", "players"]);
        assert!(s.list_channels().unwrap().is_empty());

        s.create_channel(&spec("export", "sec")).unwrap();
        assert_eq!(s.list_channels().unwrap()[0].name, "export");
        assert!(matches!(
            s.create_channel(&spec("export", "sec")),
            Err(RemoteError::Other(_))
        ));

        s.delete_channel("export").unwrap();
        assert!(matches!(
            s.delete_channel("export"),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn authenticate_and_fetch() {
        let (_tmp, s) = store();
        s.create_channel(&spec("export", "sec")).unwrap();

        assert!(matches!(
            s.authenticate("export", "forged"),
            Err(RemoteError::Auth(_))
        ));
        let conn = s
            .authenticate("export", &derive_credential("sec", CLIENT_IDENTITY))
            .unwrap();
        assert_eq!(
            conn.fetch("players", "alice").unwrap(),
            serde_json::json!({"lvl": 3})
        );
        assert_eq!(conn.fetch("players", "bob"), Err(FetchError::NotFound));
        assert!(matches!(
            conn.fetch("items", "sword"),
            Err(FetchError::Transient(_))
        ));
    }
}
