use crate::transport::context::{CliPlugin, ClientConfig};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;
use url::Url;

pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpCliPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CliPlugin for HttpCliPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn augment_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("http_server")
                .long("server")
                .global(true)
                .help_heading("HTTP")
                .help("Base URL of the download server")
                .default_value("http://localhost:5000/")
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .global(true)
                .help_heading("HTTP")
                .help("HTTP User-Agent")
                .default_value("OrangeWatch/0.1")
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_secs")
                .long("timeout-secs")
                .global(true)
                .help_heading("HTTP")
                .help("Seconds to wait for a response to start")
                .default_value("10")
                .num_args(1),
        )
        .arg(
            Arg::new("watch_reconnect_attempts")
                .long("reconnect-attempts")
                .global(true)
                .help_heading("Progress stream")
                .help("Reconnects after the stream drops before the job is assumed finished")
                .default_value("1")
                .num_args(1),
        )
        .arg(
            Arg::new("watch_reconnect_delay_ms")
                .long("reconnect-delay-ms")
                .global(true)
                .help_heading("Progress stream")
                .help("Delay before the first reconnect in milliseconds; doubles per attempt")
                .default_value("1000")
                .num_args(1),
        )
        .arg(
            Arg::new("watch_reconnect_max_delay_ms")
                .long("reconnect-max-delay-ms")
                .global(true)
                .help_heading("Progress stream")
                .help("Upper bound for the reconnect delay in milliseconds")
                .default_value("30000")
                .num_args(1),
        )
        .arg(
            Arg::new("watch_grace_secs")
                .long("grace-secs")
                .global(true)
                .help_heading("Progress stream")
                .help("Seconds a finished session stays queryable")
                .default_value("5")
                .num_args(1),
        )
    }

    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut ClientConfig) -> anyhow::Result<()> {
        if let Some(s) = matches.get_one::<String>("http_server") {
            let mut base = Url::parse(s).map_err(|e| anyhow::anyhow!("invalid server url {}: {}", s, e))?;
            // joins resolve against the last segment otherwise
            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }
            cfg.transport.base_url = base;
        }
        if let Some(ua) = matches.get_one::<String>("http_user_agent") {
            cfg.transport.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("http_timeout_secs") {
            cfg.transport.timeout_secs = s.parse()?;
        }

        let policy = &mut cfg.watch.reconnect;
        if let Some(s) = matches.get_one::<String>("watch_reconnect_attempts") {
            policy.max_attempts = s.parse()?;
        }
        if let Some(s) = matches.get_one::<String>("watch_reconnect_delay_ms") {
            policy.base_delay = Duration::from_millis(s.parse()?);
        }
        if let Some(s) = matches.get_one::<String>("watch_reconnect_max_delay_ms") {
            policy.max_delay = Duration::from_millis(s.parse()?);
        }
        if policy.max_delay < policy.base_delay {
            anyhow::bail!("--reconnect-max-delay-ms must not be below --reconnect-delay-ms");
        }
        if let Some(s) = matches.get_one::<String>("watch_grace_secs") {
            cfg.watch.grace = Duration::from_secs(s.parse()?);
        }

        Ok(())
    }
}
