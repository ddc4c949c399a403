use clap::{Arg, ArgAction, ArgMatches, Command};
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use segfetch::core::catalog::{parse_hash, HistoryScope, SharedFolder, ACTIONS, FILES};
use segfetch::core::engine::{Engine, EngineConfig};
use segfetch::core::events::FetchEvent;
use segfetch::core::model::{FetchId, FetchStatus, DEFAULT_HOP_LIMIT};
use segfetch::core::naming::ResourceName;
use segfetch::plugins::registry::{CliConfig, PluginRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

const TRACING_TARGET: &str = "segfetch::cli";

fn build_cli(registry: &PluginRegistry) -> Command {
    let object = Command::new("object")
        .about("Fetch one or more segmented objects and save them")
        .arg(
            Arg::new("names")
                .help("Base names, e.g. /ndn/ucla/bob/chronoshare/file/%BA%0C")
                .action(ArgAction::Append)
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("segments")
                .long("segments")
                .help("Number of segments in each object")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("out_dir")
                .long("out-dir")
                .help("Output directory")
                .default_value("./downloads")
                .num_args(1),
        );

    let files = Command::new("files")
        .about("List files of the shared folder")
        .arg(Arg::new("sub_folder").help("Only list below this sub-folder").num_args(1))
        .arg(offset_arg());

    let history = Command::new("history")
        .about("List recorded actions for the folder or one file")
        .arg(
            Arg::new("file")
                .long("file")
                .help("History of a single file")
                .num_args(1)
                .conflicts_with("sub_folder"),
        )
        .arg(Arg::new("sub_folder").long("sub-folder").help("History below this sub-folder").num_args(1))
        .arg(offset_arg());

    let restore = Command::new("restore")
        .about("Ask the state service to restore a file version")
        .arg(Arg::new("file").required(true).num_args(1))
        .arg(Arg::new("version").required(true).num_args(1))
        .arg(Arg::new("hash").long("hash").help("Content hash (hex)").num_args(1));

    let pending = Command::new("pending")
        .about("Show fetches the journal never saw finish")
        .arg(
            Arg::new("prune_secs")
                .long("prune-older-than")
                .help("Also drop finished records older than this many seconds")
                .num_args(1),
        );

    let root = Command::new("segfetch")
        .about("Segmented object and paged collection fetcher")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .help("Transport endpoint: http(s)://gateway or file:///mirror")
                .default_value("http://127.0.0.1:9001")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("hop_limit")
                .long("hop-limit")
                .help("Maximum page hops per collection fetch")
                .default_value("5")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("state_dir")
                .long("state-dir")
                .help("Directory for the fetch journal (off when unset)")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .help("Device name of the state service")
                .default_value("/local")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("folder")
                .long("folder")
                .help("Shared folder name")
                .default_value("shared")
                .global(true)
                .num_args(1),
        )
        .subcommand(object)
        .subcommand(files)
        .subcommand(history)
        .subcommand(restore)
        .subcommand(pending);

    registry.augment_command(root)
}

fn offset_arg() -> Arg {
    Arg::new("offset")
        .long("offset")
        .help("First page to request")
        .default_value("0")
        .num_args(1)
}

fn shared_folder(m: &ArgMatches) -> anyhow::Result<SharedFolder> {
    let device: ResourceName = required(m, "device")?.parse()?;
    Ok(SharedFolder::new(device, required(m, "folder")?))
}

fn required<'a>(m: &'a ArgMatches, id: &str) -> anyhow::Result<&'a str> {
    m.get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing --{}", id.replace('_', "-")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    segfetch::telemetry::init("info")?;

    let registry = PluginRegistry::with_defaults();
    let matches = build_cli(&registry).get_matches();

    let mut cfg = CliConfig::default();
    registry.apply_matches(&matches, &mut cfg)?;
    cfg.hop_limit = matches
        .get_one::<String>("hop_limit")
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(DEFAULT_HOP_LIMIT);

    let endpoint = required(&matches, "endpoint")?;
    let transport = registry.open(endpoint, &cfg.transport_ctx)?;
    let mut engine = Engine::new(
        transport,
        EngineConfig { hop_limit: cfg.hop_limit, ..Default::default() },
    );
    if let Some(dir) = matches.get_one::<String>("state_dir") {
        engine = engine.with_journal(Path::new(dir)).await?;
    }

    let ui_task = tokio::spawn(progress_ui(engine.subscribe()));
    let outcome = run(&engine, &matches).await;

    // the UI stops once every sender is gone
    drop(engine);
    let _ = ui_task.await;
    outcome
}

async fn run(engine: &Engine, matches: &ArgMatches) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("object", m)) => {
            let total: u64 = required(m, "segments")?.parse()?;
            let out_dir = PathBuf::from(required(m, "out_dir")?);
            tokio::fs::create_dir_all(&out_dir).await?;

            let names = m
                .get_many::<String>("names")
                .into_iter()
                .flatten()
                .map(|s| s.parse::<ResourceName>())
                .collect::<Result<Vec<_>, _>>()?;

            let saves = names.iter().map(|name| {
                let target = out_dir.join(output_file_name(name));
                async move { (name, engine.save_object(name, total, &target).await) }
            });

            let mut failed = 0;
            for (name, result) in join_all(saves).await {
                match result {
                    Ok(path) => println!("{} -> {}", name, path.display()),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {:#}", name, e);
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} objects failed", failed, names.len());
            }
        }
        Some(("files", m)) => {
            let folder = shared_folder(m)?;
            let offset: u64 = required(m, "offset")?.parse()?;
            let base = folder.files(m.get_one::<String>("sub_folder").map(String::as_str));

            let listing = engine.fetch_collection(&base, offset, FILES).await?;
            for f in &listing.items {
                println!(
                    "{}\tv{}\t{}\t{} segments\t{}\t{}",
                    f.filename, f.version, f.owner.user_name, f.seg_num, f.timestamp, f.hash
                );
            }
            if let Some(next) = listing.cursor() {
                println!("(more, continue with --offset {})", next);
            }
        }
        Some(("history", m)) => {
            let folder = shared_folder(m)?;
            let offset: u64 = required(m, "offset")?.parse()?;
            let scope = match m.get_one::<String>("file") {
                Some(f) => HistoryScope::File(f.clone()),
                None => HistoryScope::Folder(m.get_one::<String>("sub_folder").cloned()),
            };

            let history = engine.fetch_collection(&folder.history(&scope), offset, ACTIONS).await?;
            for a in &history.items {
                println!(
                    "{}\t{:?}\tv{}\t{}#{}\t{}",
                    a.timestamp, a.action, a.version, a.id.user_name, a.id.seq_no, a.filename
                );
            }
            if let Some(next) = history.cursor() {
                println!("(more, continue with --offset {})", next);
            }
        }
        Some(("restore", m)) => {
            let folder = shared_folder(m)?;
            let file = required(m, "file")?;
            let version: u64 = required(m, "version")?.parse()?;
            let hash = m
                .get_one::<String>("hash")
                .map(|h| parse_hash(h).ok_or_else(|| anyhow::anyhow!("invalid hash: {}", h)))
                .transpose()?;

            engine.restore(&folder.restore(file, version, hash.as_deref())).await?;
            println!("restored {} to version {}", file, version);
        }
        Some(("pending", m)) => {
            let journal = engine
                .journal()
                .ok_or_else(|| anyhow::anyhow!("pending needs --state-dir"))?;

            if let Some(secs) = m.get_one::<String>("prune_secs") {
                let secs: i64 = secs.parse()?;
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)?
                    .as_secs() as i64;
                let pruned = journal.prune_finished(now - secs).await?;
                tracing::info!(target: TRACING_TARGET, pruned, "pruned finished fetches");
            }

            for r in journal.list_unfinished().await? {
                let total = r.total_segments.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string());
                println!("{}\t{}\t{}/{}\t{}", r.fetch_id, r.kind.as_str(), r.received, total, r.name);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Last non-segment component of `name`, made safe as a file name.
fn output_file_name(name: &ResourceName) -> String {
    let raw = name
        .components()
        .iter()
        .rev()
        .find(|c| c.as_segment().is_none())
        .map(|c| match std::str::from_utf8(c.as_bytes()) {
            Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
            _ => hex(c.as_bytes()),
        })
        .unwrap_or_default();
    let cleaned = sanitize_filename::sanitize(raw);
    if cleaned.is_empty() { "object".to_string() } else { cleaned }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn progress_ui(mut rx: broadcast::Receiver<FetchEvent>) {
    let mp = MultiProgress::new();
    let sty_spinner = ProgressStyle::with_template("{spinner:.green} {prefix} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("|/-\\ ");
    let sty_bar = ProgressStyle::with_template("{prefix} {bar:40.cyan/blue} {pos}/{len} segments {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let mut bars: HashMap<FetchId, ProgressBar> = HashMap::new();
    let mut bytes: HashMap<FetchId, u64> = HashMap::new();

    loop {
        let evt = match rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match evt {
            FetchEvent::FetchStarted { fetch_id, kind, name } => {
                let pb = mp.add(ProgressBar::new_spinner());
                pb.set_style(sty_spinner.clone());
                pb.set_prefix(format!("[{}]", kind.as_str()));
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
                pb.set_message(name);
                bars.insert(fetch_id, pb);
            }
            FetchEvent::RequestIssued { fetch_id, name } => {
                if let Some(pb) = bars.get(&fetch_id) {
                    pb.set_message(format!("-> {}", name));
                }
            }
            FetchEvent::SegmentReceived { fetch_id, index, total, bytes: n } => {
                let sum = bytes.entry(fetch_id).or_insert(0);
                *sum += n;
                if let Some(pb) = bars.get(&fetch_id) {
                    if pb.length() != Some(total) {
                        pb.set_style(sty_bar.clone());
                        pb.set_length(total);
                    }
                    pb.set_position(index + 1);
                    pb.set_message(fmt_bytes(*sum));
                }
            }
            FetchEvent::PageReceived { fetch_id, hop, items, more } => {
                if let Some(pb) = bars.get(&fetch_id) {
                    let more = more.map(|m| format!(", more from {}", m)).unwrap_or_default();
                    pb.set_message(format!("hop {}: {} items{}", hop, items, more));
                }
            }
            FetchEvent::StatusChanged { fetch_id, status } => {
                if let Some(pb) = bars.get(&fetch_id) {
                    match status {
                        FetchStatus::Completed => pb.finish_with_message("done"),
                        FetchStatus::Failed => pb.abandon_with_message("failed"),
                        _ => {}
                    }
                }
            }
            FetchEvent::Error { scope, message } => {
                let _ = mp.println(format!("[ERR] {}: {}", scope, message));
            }
            FetchEvent::Info { scope, message } => {
                let _ = mp.println(format!("[INFO] {}: {}", scope, message));
            }
        }
    }
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let f = n as f64;
    if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_names_skip_segments_and_escape_binary() {
        let name: ResourceName = "/ndn/bob/chronoshare/file/%BA%0C".parse().unwrap();
        assert_eq!(output_file_name(&name.add_segment(3)), "ba0c");
        let name: ResourceName = "/x/report.pdf".parse().unwrap();
        assert_eq!(output_file_name(&name), "report.pdf");
        assert_eq!(output_file_name(&ResourceName::root()), "object");
    }

    #[test]
    fn cli_parses_global_flags_after_subcommands() {
        let registry = PluginRegistry::with_defaults();
        let m = build_cli(&registry)
            .try_get_matches_from(["segfetch", "restore", "a.txt", "3", "--hash", "ab01", "--folder", "docs"])
            .unwrap();
        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "restore");
        let folder = shared_folder(sub).unwrap();
        assert_eq!(
            folder.restore("a.txt", 3, Some(&[0xab, 0x01])).to_uri(),
            "/localhost/local/chronoshare/docs/cmd/restore/file/a.txt/%00%03/%AB%01"
        );
        assert_eq!(required(sub, "endpoint").unwrap(), "http://127.0.0.1:9001");
    }
}
