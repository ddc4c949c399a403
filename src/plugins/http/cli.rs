use crate::plugins::registry::{CliConfig, CliPlugin};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

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
            Arg::new("http_header")
                .long("header")
                .help_heading("HTTP")
                .help("Extra HTTP header for gateway requests (repeatable), e.g. --header 'X-Forwarded-For: 10.0.0.1'")
                .action(ArgAction::Append)
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .help_heading("HTTP")
                .help("HTTP User-Agent")
                .default_value("segfetch/0.1")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_ms")
                .long("timeout-ms")
                .help_heading("HTTP")
                .help("Per-request deadline in milliseconds")
                .default_value("4000")
                .global(true)
                .num_args(1),
        )
    }

    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut CliConfig) -> anyhow::Result<()> {
        if let Some(ua) = matches.get_one::<String>("http_user_agent") {
            cfg.transport_ctx.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("http_timeout_ms") {
            cfg.transport_ctx.timeout = Duration::from_millis(s.parse()?);
        }

        if let Some(values) = matches.get_many::<String>("http_header") {
            for h in values {
                let (k, v) = h
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid header format: {}", h))?;
                cfg.transport_ctx.headers.push((k.trim().to_string(), v.trim().to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<CliConfig> {
        let cmd = HttpCliPlugin::new().augment_command(Command::new("segfetch"));
        let m = cmd.try_get_matches_from(args)?;
        let mut cfg = CliConfig::default();
        HttpCliPlugin::new().apply_matches(&m, &mut cfg)?;
        Ok(cfg)
    }

    #[test]
    fn defaults_to_a_four_second_deadline() {
        let cfg = parse(&["segfetch"]).unwrap();
        assert_eq!(cfg.transport_ctx.timeout, Duration::from_millis(4000));
        assert!(cfg.transport_ctx.headers.is_empty());
    }

    #[test]
    fn reads_headers_and_timeout() {
        let cfg = parse(&["segfetch", "--timeout-ms", "250", "--header", "X-A: 1", "--header", "X-B:2"]).unwrap();
        assert_eq!(cfg.transport_ctx.timeout, Duration::from_millis(250));
        assert_eq!(cfg.transport_ctx.headers, vec![("X-A".to_string(), "1".to_string()), ("X-B".to_string(), "2".to_string())]);
        assert!(parse(&["segfetch", "--header", "nocolon"]).is_err());
    }
}
