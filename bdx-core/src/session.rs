use crate::error::{ExportError, Result};
use crate::remote::fs::FsStore;
use crate::remote::{ControlPlane, DataPlane};
use std::path::PathBuf;
use std::sync::Arc;

pub enum Backend {
    Fs,
}

#[derive(Clone, Debug)]
pub struct LoginParams {
    pub store: PathBuf,
    pub account: String,
    pub secret: String,
    pub game: String,
}

/// Logged-in account with a selected game.
pub struct Session {
    pub account: String,
    pub game: String,
    pub control: Arc<dyn ControlPlane>,
    pub data: Arc<dyn DataPlane>,
}

impl LoginParams {
    /// Rejects blank account, secret or game before anything touches the store.
    pub fn validate(&self) -> Result<()> {
        for (flag, v) in [
            ("username", &self.account),
            ("password", &self.secret),
            ("game", &self.game),
        ] {
            if v.trim().is_empty() {
                return Err(ExportError::Config(format!("--{flag} must not be empty")));
            }
        }
        Ok(())
    }
}

pub fn open_store(backend: Backend, p: LoginParams) -> Result<Session> {
    p.validate()?;
    match backend {
        Backend::Fs => {
            let store = Arc::new(FsStore::login(&p.store, &p.account, &p.secret, &p.game)?);
            Ok(Session {
                account: p.account,
                game: p.game,
                control: store.clone(),
                data: store,
            })
        }
    }
}
