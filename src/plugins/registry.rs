use async_trait::async_trait;
use crate::core::error::TransportError;
use crate::core::model::{Response, DEFAULT_HOP_LIMIT};
use crate::core::naming::ResourceName;
use clap::{ArgMatches, Command};
use std::sync::Arc;
use std::time::Duration;

/// Deadline applied by transports when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone)]
pub struct TransportContext {
    pub user_agent: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl Default for TransportContext {
    fn default() -> Self {
        Self { user_agent: "segfetch/0.1".to_string(), timeout: DEFAULT_TIMEOUT, headers: vec![] }
    }
}

/// Request/response delivery: one name in, exactly one outcome out.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn express(&self, name: &ResourceName) -> Result<Response, TransportError>;
}

/// Turns an endpoint string into a transport. The highest non-zero score wins.
pub trait EndpointResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, endpoint: &str) -> u8;
    fn open(&self, endpoint: &str, ctx: &TransportContext) -> anyhow::Result<Arc<dyn Transport>>;
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub transport_ctx: TransportContext,
    pub hop_limit: u32,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { transport_ctx: TransportContext::default(), hop_limit: DEFAULT_HOP_LIMIT }
    }
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_command(&self, cmd: Command) -> Command;
    fn apply_matches(&self, matches: &ArgMatches, cfg: &mut CliConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    resolvers: Vec<Box<dyn EndpointResolver>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { resolvers: vec![], cli_plugins: vec![] };

        reg.resolvers.push(Box::new(crate::plugins::http::resolver::HttpResolver::new()));
        reg.resolvers.push(Box::new(crate::plugins::fs::resolver::FsResolver::new()));

        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        reg
    }

    pub fn augment_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_command(c))
    }

    pub fn apply_matches(&self, matches: &ArgMatches, cfg: &mut CliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_matches(matches, cfg)?;
        }
        Ok(())
    }

    pub fn best_resolver(&self, endpoint: &str) -> Option<&dyn EndpointResolver> {
        self.resolvers
            .iter()
            .map(|r| (r.can_handle(endpoint), r.as_ref()))
            .max_by_key(|(c, _)| *c)
            .and_then(|(c, r)| if c == 0 { None } else { Some(r) })
    }

    pub fn open(&self, endpoint: &str, ctx: &TransportContext) -> anyhow::Result<Arc<dyn Transport>> {
        let resolver = self
            .best_resolver(endpoint)
            .ok_or_else(|| anyhow::anyhow!("no transport for endpoint: {}", endpoint))?;
        tracing::debug!(endpoint, resolver = resolver.name(), "opening transport");
        resolver.open(endpoint, ctx)
    }
}
