//! Access-channel provisioning against an eventually consistent control plane.
//!
//! Absent -> (StaleExists) -> Creating -> Verifying -> Ready
//!
//! A delete or create is never assumed visible on the next read; every step
//! re-lists channels until the expected state is observed.

use crate::cancel::CancelToken;
use crate::crypto::secret::{CLIENT_IDENTITY, derive_credential, generate_shared_secret};
use crate::error::{ExportError, Result};
use crate::remote::{
    AuthMethod, ChannelSpec, ControlPlane, DataPlane, Permission, RecordFetcher, RemoteError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    pub channel_name: String,
    pub description: String,
    pub poll_interval: Duration,
    pub client_identity: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            channel_name: "export".to_string(),
            description: "temporary read-only channel for snapshot export".to_string(),
            poll_interval: Duration::from_secs(1),
            client_identity: CLIENT_IDENTITY.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionState {
    Absent,
    StaleExists,
    Creating,
    Verifying,
    Ready,
}

/// Terminal success: a visible channel and a connection authenticated on it.
pub struct ReadyChannel {
    pub name: String,
    pub shared_secret: String,
    pub connection: Arc<dyn RecordFetcher>,
}

impl std::fmt::Debug for ReadyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyChannel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub struct ChannelProvisioner<'a> {
    control: &'a dyn ControlPlane,
    data: &'a dyn DataPlane,
    cfg: ProvisionerConfig,
    cancel: CancelToken,
    state: ProvisionState,
    // set once a create request went out; cleanup target on any failure
    created: bool,
    history: Vec<ProvisionState>,
}

impl<'a> ChannelProvisioner<'a> {
    pub fn new(
        control: &'a dyn ControlPlane,
        data: &'a dyn DataPlane,
        cfg: ProvisionerConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            control,
            data,
            cfg,
            cancel,
            state: ProvisionState::Absent,
            created: false,
            history: vec![ProvisionState::Absent],
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[ProvisionState] {
        &self.history
    }

    /// Drive the channel to `Ready`. On any error a channel this call created
    /// is deleted again before returning.
    pub fn provision(&mut self, account: &str, game: &str) -> Result<ReadyChannel> {
        let res = self.establish(account, game);
        if let Err(e) = &res {
            if !matches!(e, ExportError::Cancelled) {
                self.discard_created("provisioning failed");
            }
        }
        res
    }

    fn establish(&mut self, account: &str, game: &str) -> Result<ReadyChannel> {
        let control = self.control;
        let name = self.cfg.channel_name.clone();

        if self.channel_visible(&name)? {
            self.enter(ProvisionState::StaleExists);
            self.remove_stale(&name)?;
        }

        let tables = self.retry("list tables", || control.list_tables())?;
        let permissions: BTreeMap<String, Permission> = tables
            .into_iter()
            .map(|t| (t, Permission::read_only()))
            .collect();
        let spec = ChannelSpec {
            name: name.clone(),
            description: self.cfg.description.clone(),
            auth_method: AuthMethod::SharedSecret,
            permissions,
            shared_secret: generate_shared_secret(account, game)?,
        };

        self.enter(ProvisionState::Creating);
        debug!(channel = %name, tables = spec.permissions.len(), "creating channel");
        self.created = true;
        self.retry("create channel", || control.create_channel(&spec))?;

        self.enter(ProvisionState::Verifying);
        while !self.channel_visible(&name)? {
            debug!(channel = %name, "channel not visible yet");
            self.wait()?;
        }

        self.check_cancel()?;
        let credential = derive_credential(&spec.shared_secret, &self.cfg.client_identity);
        let connection = self
            .data
            .authenticate(&name, &credential)
            .map_err(|e| ExportError::ProvisioningFailed(format!("authenticate on {name}: {e}")))?;

        self.enter(ProvisionState::Ready);
        info!(channel = %name, "channel ready");
        Ok(ReadyChannel {
            name,
            shared_secret: spec.shared_secret,
            connection,
        })
    }

    fn remove_stale(&mut self, name: &str) -> Result<()> {
        let control = self.control;
        info!(channel = %name, "removing channel left by a previous run");
        self.retry("delete stale channel", || match control.delete_channel(name) {
            // already gone is what we want
            Err(RemoteError::NotFound(_)) => Ok(()),
            other => other,
        })?;
        while self.channel_visible(name)? {
            debug!(channel = %name, "stale channel still visible");
            self.wait()?;
        }
        Ok(())
    }

    fn channel_visible(&mut self, name: &str) -> Result<bool> {
        let control = self.control;
        let channels = self.retry("list channels", || control.list_channels())?;
        Ok(channels.iter().any(|c| c.name == name))
    }

    /// Auth and not-found answers mean "not visible yet"; anything else is fatal.
    fn retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut() -> std::result::Result<T, RemoteError>,
    ) -> Result<T> {
        loop {
            self.check_cancel()?;
            match op() {
                Ok(v) => return Ok(v),
                Err(e @ (RemoteError::Auth(_) | RemoteError::NotFound(_))) => {
                    debug!(state = ?self.state, error = %e, "{what}: retrying");
                    self.wait()?;
                }
                Err(RemoteError::Other(msg)) => {
                    return Err(ExportError::ProvisioningFailed(format!("{what}: {msg}")));
                }
            }
        }
    }

    fn wait(&mut self) -> Result<()> {
        if self.cancel.sleep(self.cfg.poll_interval) {
            Ok(())
        } else {
            Err(self.abort())
        }
    }

    fn check_cancel(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.abort());
        }
        Ok(())
    }

    fn abort(&mut self) -> ExportError {
        self.discard_created("cancelled");
        ExportError::Cancelled
    }

    /// Best-effort delete of the channel this provisioner created, once.
    fn discard_created(&mut self, reason: &str) {
        if !self.created {
            return;
        }
        self.created = false;
        let name = &self.cfg.channel_name;
        match self.control.delete_channel(name) {
            Ok(()) | Err(RemoteError::NotFound(_)) => {
                info!(channel = %name, reason, "removed channel that never became ready")
            }
            Err(e) => warn!(channel = %name, reason, error = %e, "channel cleanup failed"),
        }
    }

    fn enter(&mut self, next: ProvisionState) {
        debug!(from = ?self.state, to = ?next, "provisioner transition");
        self.state = next;
        self.history.push(next);
    }
}

/// Best-effort removal of the export channel once the run is over.
pub fn teardown(control: &dyn ControlPlane, name: &str) -> Result<()> {
    match control.delete_channel(name) {
        Ok(()) | Err(RemoteError::NotFound(_)) => Ok(()),
        Err(e) => Err(ExportError::ProvisioningFailed(format!(
            "delete channel {name}: {e}"
        ))),
    }
}
