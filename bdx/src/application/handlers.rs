use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use bdx_core::error::{ExportError, Result};
use bdx_core::pipeline::{ProgressEvent, RunSummary};
use bdx_core::provision::teardown;
use bdx_core::{
    Backend, CancelToken, ChannelProvisioner, ExportOptions, ExportPipeline, LoginParams,
    ProvisionerConfig, discover_archives, open_store, scan_archive,
};
use tracing::warn;

use crate::presentation::cli::LoginArgs;

const EXIT_CANCELLED: u8 = 130;
const PROGRESS_EVERY: u64 = 100;

/// Checks every login input without contacting the store.
fn login_params(args: &LoginArgs) -> Result<LoginParams> {
    if args.channel.trim().is_empty() {
        return Err(ExportError::Config("--channel must not be empty".into()));
    }
    let params = LoginParams {
        store: args.store.clone(),
        account: args.username.clone(),
        secret: args.password.clone(),
        game: args.game.clone(),
    };
    params.validate()?;
    Ok(params)
}

fn install_interrupt(cancel: &CancelToken) -> Result<()> {
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("interrupt: finishing current keys, then stopping");
        flag.cancel();
    })
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

/// Renders progress events from all archive workers on stderr.
fn spawn_progress(rx: mpsc::Receiver<ProgressEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for ev in rx {
            if ev.processed == ev.total || ev.processed % PROGRESS_EVERY == 0 {
                eprintln!(
                    "[{}] {}/{} {}",
                    ev.archive, ev.processed, ev.total, ev.current
                );
            }
        }
    })
}

/// Waits for the progress renderer; false if it panicked.
fn join_progress(handle: std::thread::JoinHandle<()>) -> bool {
    if handle.join().is_err() {
        warn!("progress reporter panicked; progress output may be incomplete");
        return false;
    }
    true
}

fn print_summary(summary: &RunSummary, error_log: &std::path::Path, logged: u64) {
    for o in &summary.outcomes {
        let name = o.archive.display();
        match &o.result {
            Ok(r) => eprintln!(
                "{name}: {}/{} written={} resumed={} absent={} failed={}{}",
                r.written + r.resumed + r.absent + r.failed,
                r.total,
                r.written,
                r.resumed,
                r.absent,
                r.failed,
                if r.cancelled { " (cancelled)" } else { "" }
            ),
            Err(e) => eprintln!("{name}: {e}"),
        }
    }
    let errors = summary.error_count();
    eprintln!(
        "export: {} records written, {errors} errors{}",
        summary.written(),
        if logged > 0 {
            format!(" ({logged} lines in {})", error_log.display())
        } else {
            String::new()
        }
    );
}

pub fn handle_export(
    login_args: LoginArgs,
    archives_dir: PathBuf,
    out: PathBuf,
    error_log: Option<PathBuf>,
    threads: usize,
    poll_ms: u64,
    keep_channel: bool,
) -> Result<ExitCode> {
    let params = login_params(&login_args)?;
    if archives_dir.as_os_str().is_empty() {
        return Err(ExportError::Config("--archives must not be empty".into()));
    }
    let archives = discover_archives(&archives_dir)?;
    if archives.is_empty() {
        eprintln!("export: no .zip archives in {}", archives_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    let session = open_store(Backend::Fs, params)?;

    let cancel = CancelToken::new();
    install_interrupt(&cancel)?;

    let cfg = ProvisionerConfig {
        channel_name: login_args.channel.clone(),
        poll_interval: Duration::from_millis(poll_ms.max(1)),
        ..ProvisionerConfig::default()
    };
    let ready = match ChannelProvisioner::new(
        session.control.as_ref(),
        session.data.as_ref(),
        cfg,
        cancel.clone(),
    )
    .provision(&session.account, &session.game)
    {
        Ok(r) => r,
        Err(ExportError::Cancelled) => {
            eprintln!("export: cancelled before the channel was ready");
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
        Err(e) => return Err(e),
    };

    let opts = ExportOptions {
        error_log: error_log.unwrap_or_else(|| out.join("errors.log")),
        out_root: out,
        threads,
    };
    let error_log_path = opts.error_log.clone();
    let (tx, rx) = mpsc::channel();
    let progress = spawn_progress(rx);
    let pipeline = ExportPipeline::new(ready.connection.clone(), opts, cancel.clone())?
        .with_progress(tx);
    let summary = pipeline.run(&archives);
    let logged = pipeline.error_log().count();
    // closes the progress channel
    drop(pipeline);
    join_progress(progress);

    if !keep_channel {
        if let Err(e) = teardown(session.control.as_ref(), &ready.name) {
            warn!(error = %e, "could not remove access channel");
        }
    }

    let summary = summary?;
    print_summary(&summary, &error_log_path, logged);
    if cancel.is_cancelled() {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn handle_scan(archive: PathBuf) -> Result<ExitCode> {
    let keys = scan_archive(&archive)?;
    let mut dupes: BTreeMap<&str, usize> = BTreeMap::new();
    let mut out = std::io::stdout().lock();
    for k in &keys {
        *dupes.entry(k.as_str()).or_default() += 1;
        writeln!(out, "{k}")?;
    }
    let repeated = dupes.values().filter(|&&n| n > 1).count();
    eprintln!(
        "scan: {} keys ({} distinct, {repeated} repeated)",
        keys.len(),
        dupes.len()
    );
    Ok(ExitCode::SUCCESS)
}

pub fn handle_cleanup(login_args: LoginArgs) -> Result<ExitCode> {
    let session = open_store(Backend::Fs, login_params(&login_args)?)?;
    teardown(session.control.as_ref(), &login_args.channel)?;
    eprintln!("cleanup: channel {} removed", login_args.channel);
    Ok(ExitCode::SUCCESS)
}
