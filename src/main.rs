use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use orange_watch::core::events::{ChannelObserver, SessionEvent};
use orange_watch::core::model::{JobMode, SessionSnapshot, TerminalOutcome, TerminalReason};
use orange_watch::core::session::SessionTracker;
use orange_watch::i18n::{get_messages, Locale, Messages};
use orange_watch::transport::context::{CliPlugin, ClientConfig};
use orange_watch::transport::http::api::{DownloadRequest, JobsApi};
use orange_watch::transport::http::cli::HttpCliPlugin;
use orange_watch::transport::http::driver::HttpSseTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

fn build_cli(plugin: &dyn CliPlugin) -> Command {
    let download = Command::new("download")
        .about("Start a download on the server and follow its progress")
        .arg(Arg::new("url").help("Video or playlist URL").required(true).num_args(1))
        .arg(
            Arg::new("playlist")
                .long("playlist")
                .help("Download the URL as a playlist")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output_dir")
                .long("output-dir")
                .help("Output directory on the server")
                .default_value("downloads")
                .num_args(1),
        )
        .arg(
            Arg::new("bitrate")
                .long("bitrate")
                .help("Audio bitrate in kbps")
                .default_value("192")
                .num_args(1),
        )
        .arg(
            Arg::new("split_large_files")
                .long("split-large-files")
                .help("Split long recordings into parts")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("split_by_chapters")
                .long("split-by-chapters")
                .help("One file per chapter")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .help("First playlist entry (1-based)")
                .num_args(1),
        )
        .arg(
            Arg::new("end")
                .long("end")
                .help("Last playlist entry")
                .num_args(1),
        );

    let watch = Command::new("watch")
        .about("Follow the progress of an existing job")
        .arg(Arg::new("job_id").help("Job id returned by the server").required(true).num_args(1))
        .arg(
            Arg::new("playlist")
                .long("playlist")
                .help("Show playlist progress")
                .action(ArgAction::SetTrue),
        );

    let location = Command::new("location")
        .about("Show where a completed job saved its file")
        .arg(Arg::new("job_id").help("Job id returned by the server").required(true).num_args(1));

    let cmd = Command::new("orange-watch")
        .about("Start audio downloads and watch their progress stream")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("locale")
                .long("locale")
                .global(true)
                .help("Output language (en, zh)")
                .default_value("en")
                .num_args(1),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .help("Print snapshots as JSON lines instead of progress bars")
                .action(ArgAction::SetTrue),
        )
        .subcommand(download)
        .subcommand(watch)
        .subcommand(location);

    plugin.augment_command(cmd)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let plugin = HttpCliPlugin::new();
    let matches = build_cli(&plugin).get_matches();
    let (name, m) = matches.subcommand().context("missing subcommand")?;

    let mut cfg = ClientConfig::default();
    plugin.apply_matches(m, &mut cfg)?;
    let msgs = get_messages(Locale::from_str(m.get_one::<String>("locale").map(String::as_str).unwrap_or("en")));
    let json = m.get_flag("json");

    match name {
        "download" => {
            let mode = if m.get_flag("playlist") { JobMode::Playlist } else { JobMode::Single };
            let req = download_request(m)?;
            let api = JobsApi::new(cfg.transport.clone());
            let created = match mode {
                JobMode::Single => api.create_download(&req).await,
                JobMode::Playlist => api.create_playlist(&req).await,
            }
            .context("creating download job")?;
            if !json {
                println!("{}: {}", msgs.job_created, created.download_id);
            }

            let outcome = watch_job(&cfg, created.download_id.clone(), mode, msgs, json).await?;
            if !outcome.is_success() {
                anyhow::bail!("job {} failed", created.download_id);
            }
            if mode == JobMode::Single && !json {
                // the file may not be indexed yet; this is informational only
                match api.location(&created.download_id).await {
                    Ok(loc) => println!("{}: {} ({})", msgs.location_label, loc.file_path, fmt_bytes(loc.file_size)),
                    Err(e) => tracing::debug!(error = %e, "location lookup failed"),
                }
            }
        }
        "watch" => {
            let job_id = m.get_one::<String>("job_id").context("job id")?.clone();
            let mode = if m.get_flag("playlist") { JobMode::Playlist } else { JobMode::Single };
            let outcome = watch_job(&cfg, job_id.clone(), mode, msgs, json).await?;
            if !outcome.is_success() {
                anyhow::bail!("job {} failed", job_id);
            }
        }
        "location" => {
            let job_id = m.get_one::<String>("job_id").context("job id")?;
            let loc = JobsApi::new(cfg.transport.clone())
                .location(job_id)
                .await
                .with_context(|| format!("looking up location of {}", job_id))?;
            if json {
                println!("{}", serde_json::to_string(&loc)?);
            } else {
                println!("{}: {} ({})", msgs.location_label, loc.file_path, fmt_bytes(loc.file_size));
            }
        }
        _ => {}
    }

    Ok(())
}

fn download_request(m: &ArgMatches) -> anyhow::Result<DownloadRequest> {
    let url = m.get_one::<String>("url").context("url")?;
    let mut req = DownloadRequest::new(url.clone());
    if let Some(s) = m.get_one::<String>("output_dir") {
        req.output_dir = s.clone();
    }
    if let Some(s) = m.get_one::<String>("bitrate") {
        req.bitrate = s.clone();
    }
    req.split_large_files = m.get_flag("split_large_files");
    req.split_by_chapters = m.get_flag("split_by_chapters");
    if let Some(s) = m.get_one::<String>("start") {
        req.start_index = Some(s.parse().context("--start")?);
    }
    if let Some(s) = m.get_one::<String>("end") {
        req.end_index = Some(s.parse().context("--end")?);
    }
    Ok(req)
}

/// Follows one job until it reaches a terminal outcome. Ctrl-C cancels the
/// observation, not the job on the server.
async fn watch_job(
    cfg: &ClientConfig,
    job_id: String,
    mode: JobMode,
    msgs: &'static Messages,
    json: bool,
) -> anyhow::Result<TerminalOutcome> {
    let tracker = SessionTracker::new(Arc::new(HttpSseTransport::new()), cfg.transport.clone(), cfg.watch.clone());
    let session = tracker.start(job_id.clone(), mode);

    let (observer, rx) = ChannelObserver::new(job_id.clone());
    session.subscribe(Arc::new(observer));
    let ui_task = if json {
        tokio::spawn(print_json_lines(rx))
    } else {
        tokio::spawn(render_bars(rx, msgs, job_id))
    };

    let terminal = tokio::select! {
        t = session.wait() => t,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            session.wait().await
        }
    };
    ui_task.await??;

    if terminal.reason == TerminalReason::TransportClosed && !json {
        eprintln!("[{}] {}", msgs.info_prefix, msgs.connection_closed_note);
    }
    Ok(terminal.outcome)
}

async fn print_json_lines(mut rx: UnboundedReceiver<SessionEvent>) -> anyhow::Result<()> {
    while let Some(evt) = rx.recv().await {
        match evt {
            SessionEvent::Updated(snap) => println!("{}", serde_json::to_string(&snap)?),
            SessionEvent::Finished { job_id, outcome, message } => {
                let line = serde_json::json!({ "job_id": job_id, "outcome": outcome, "message": message });
                println!("{}", line);
                break;
            }
        }
    }
    Ok(())
}

async fn render_bars(mut rx: UnboundedReceiver<SessionEvent>, msgs: &'static Messages, job_id: String) -> anyhow::Result<()> {
    let mp = MultiProgress::new();
    let sty_spin = ProgressStyle::with_template("{spinner:.green} {prefix} {wide_msg}")?.tick_chars("|/-\\ ");
    let sty_bar = ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {bytes}/{total_bytes} {wide_msg}")?;

    let pb = mp.add(ProgressBar::new_spinner());
    pb.set_style(sty_spin);
    pb.set_prefix(format!("[{}]", job_id.chars().take(8).collect::<String>()));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("{} {}", msgs.watching, job_id));

    while let Some(evt) = rx.recv().await {
        match evt {
            SessionEvent::Updated(snap) => {
                if let Some(t) = snap.total_bytes.filter(|t| *t > 0) {
                    if pb.length().unwrap_or(0) != t {
                        pb.set_style(sty_bar.clone());
                        pb.set_length(t);
                    }
                    pb.set_position(snap.downloaded_bytes.unwrap_or(0).min(t));
                }
                pb.set_message(describe(&snap, msgs));
            }
            SessionEvent::Finished { job_id, outcome, message } => {
                let label = if outcome.is_success() { msgs.job_succeeded } else { msgs.job_failed };
                match message {
                    Some(m) => pb.finish_with_message(format!("{} | {}", label, m)),
                    None => pb.finish_with_message(label.to_string()),
                }
                if !outcome.is_success() {
                    let _ = mp.println(format!("[{}] {}: {}", msgs.error_prefix, msgs.job_prefix, job_id));
                }
                break;
            }
        }
    }
    Ok(())
}

fn describe(snap: &SessionSnapshot, msgs: &Messages) -> String {
    let mut parts = Vec::new();
    if let Some(s) = &snap.status {
        parts.push(msgs.status_label(s).to_string());
    }
    if let (Some(cur), Some(total)) = (snap.current_item, snap.total_items) {
        parts.push(format!("{}/{} {}", cur, total, msgs.playlist_label));
    }
    if let Some(p) = snap.playlist_percent.or(snap.percent) {
        parts.push(format!("{:.1}%", p));
    }
    if let (Some(done), None) = (snap.downloaded_bytes, snap.total_bytes) {
        parts.push(format!("{} / {}", fmt_bytes(done), msgs.total_unknown));
    }
    if let Some(speed) = snap.speed_bytes_per_sec.filter(|s| *s > 0.0) {
        let eta = snap.eta().map(|e| format!("{:.0}s", e)).unwrap_or_else(|| msgs.eta_unknown.to_string());
        parts.push(format!("{}/s | eta {}", fmt_bytes(speed as u64), eta));
    }
    if let Some(m) = snap.last_message() {
        parts.push(m.to_string());
    }
    parts.join(" | ")
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}
