use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{BusError, BusInterface};
use crate::config::Config;
use crate::constants::{build_timestamp, full_version, git_commit, ICON_PLACEHOLDER};
use crate::script::{ScriptBundle, ScriptCompiler};
use crate::wire::message::EventId;
use tokio::task::JoinHandle;

/// How long `get` waits for a node before giving up.
const CONSOLE_READ_TIMEOUT: Duration = Duration::from_secs(5);

const HELP: &[&str] = &[
    "nodes                     List described nodes",
    "vars <node>               List a node's variables",
    "get <node> <var>          Read a variable from the node",
    "peek <node> <var>         Read a variable, from cache when possible",
    "set <node> <var> <v..>    Write a variable",
    "emit <event> [v..]        Fire an event (name or numeric id)",
    "listen [names..|*]        Print matching events as they arrive",
    "listen off                Stop printing events",
    "load <file> [node|all]    Load a script bundle",
    "reset [node|all]          Reset and restart nodes",
    "status                    Show links and registry sizes",
    "version                   Show version & build info",
    "help                      Show this help",
    "exit, quit                Confirm + exit",
];

/// One parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nodes,
    Vars(String),
    Get { node: String, var: String, cached: bool },
    Set { node: String, var: String, values: Vec<i16> },
    Emit { event: EventRef, data: Vec<i16> },
    Listen(Vec<String>),
    ListenOff,
    Load { file: String, target: Option<String> },
    Reset(Option<String>),
    Status,
    Version,
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRef {
    Id(EventId),
    Name(String),
}

fn values(args: &[&str]) -> Result<Vec<i16>, String> {
    args.iter()
        .map(|a| {
            a.parse::<i16>()
                .map_err(|_| format!("'{}' is not a 16-bit integer", a))
        })
        .collect()
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let usage = |u: &str| Err(format!("usage: {}", u));
    match parts.as_slice() {
        ["nodes"] => Ok(Command::Nodes),
        ["vars", node] => Ok(Command::Vars(node.to_string())),
        ["vars", ..] => usage("vars <node>"),
        ["get", node, var] => Ok(Command::Get {
            node: node.to_string(),
            var: var.to_string(),
            cached: false,
        }),
        ["get", ..] => usage("get <node> <var>"),
        ["peek", node, var] | ["cached", node, var] => Ok(Command::Get {
            node: node.to_string(),
            var: var.to_string(),
            cached: true,
        }),
        ["peek", ..] | ["cached", ..] => usage("peek <node> <var>"),
        ["set", node, var, rest @ ..] if !rest.is_empty() => Ok(Command::Set {
            node: node.to_string(),
            var: var.to_string(),
            values: values(rest)?,
        }),
        ["set", ..] => usage("set <node> <var> <v..>"),
        ["emit", event, rest @ ..] => Ok(Command::Emit {
            event: match event.parse::<EventId>() {
                Ok(id) => EventRef::Id(id),
                Err(_) => EventRef::Name(event.to_string()),
            },
            data: values(rest)?,
        }),
        ["emit"] => usage("emit <event> [v..]"),
        ["listen", "off"] => Ok(Command::ListenOff),
        ["listen", names @ ..] => Ok(Command::Listen(names.iter().map(|s| s.to_string()).collect())),
        ["load", file] => Ok(Command::Load {
            file: file.to_string(),
            target: None,
        }),
        ["load", file, target] => Ok(Command::Load {
            file: file.to_string(),
            target: Some(target.to_string()),
        }),
        ["load", ..] => usage("load <file> [node|all]"),
        ["reset"] => Ok(Command::Reset(None)),
        ["reset", target] => Ok(Command::Reset(Some(target.to_string()))),
        ["status"] => Ok(Command::Status),
        ["version"] | ["about"] => Ok(Command::Version),
        ["help"] | ["?"] => Ok(Command::Help),
        ["exit"] | ["quit"] => Ok(Command::Exit),
        [other, ..] => Err(format!("unknown command '{}', try 'help'", other)),
        [] => Err("empty command".into()),
    }
}

/// Interactive console over the bus front-end. Returns when the user exits.
pub async fn run_prompt(bus: BusInterface, compiler: Arc<dyn ScriptCompiler>, config: Config) {
    use rustyline::{CompletionType, Config as RLConfig, Editor};
    let rl_cfg = RLConfig::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .build();
    let mut rl: Editor<PromptCompleter, rustyline::history::DefaultHistory> =
        match Editor::with_config(rl_cfg) {
            Ok(rl) => rl,
            Err(e) => {
                println!("❌ Console unavailable: {}", e);
                return;
            }
        };
    rl.set_helper(Some(PromptCompleter { bus: bus.clone() }));

    let hist_path = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| std::path::PathBuf::from(home).join(".nodebridge_history"))
        .unwrap_or_else(|_| std::path::PathBuf::from(".nodebridge_history"));
    let _ = rl.load_history(hist_path.as_path());

    let label = format!(
        "{}> ",
        config.app_name.clone().unwrap_or_else(|| "nodebridge".to_string())
    );
    let mut listener: Option<JoinHandle<()>> = None;

    loop {
        let _ = std::io::stdout().flush();
        let input_owned = match rl.readline(&label) {
            Ok(mut l) => {
                l.truncate(l.trim_end().len());
                l
            }
            Err(rustyline::error::ReadlineError::Eof)
            | Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("👋 Exiting.");
                break;
            }
            Err(e) => {
                println!("❌ Read error: {}", e);
                break;
            }
        };
        let input = input_owned.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let command = match parse_command(input) {
            Ok(c) => c,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };

        match command {
            Command::Exit => match rl.readline("Confirm exit? [y/N] ") {
                Ok(ans) if matches!(ans.trim().to_lowercase().as_str(), "y" | "yes") => {
                    println!("👋 Exiting.");
                    break;
                }
                Ok(_) => println!("Abort."),
                Err(_) => {
                    println!("👋 Exiting.");
                    break;
                }
            },
            Command::Help => {
                println!("Available commands:");
                for line in HELP {
                    println!("  {}", line);
                }
                println!("\nTips: Use Tab to autocomplete commands and node names.");
            }
            Command::Version => {
                println!(
                    "{}nodebridge {}\ncommit: {}\nbuilt: {}",
                    ICON_PLACEHOLDER,
                    full_version(),
                    git_commit(),
                    build_timestamp()
                );
            }
            Command::Listen(names) => {
                if let Some(task) = listener.take() {
                    task.abort();
                }
                listener = Some(spawn_listener(&bus, names));
            }
            Command::ListenOff => match listener.take() {
                Some(task) => {
                    task.abort();
                    println!("Stopped listening.");
                }
                None => println!("Not listening."),
            },
            other => {
                if let Err(e) = execute(&bus, compiler.as_ref(), other).await {
                    println!("❌ {}", e);
                }
            }
        }
    }

    if let Some(task) = listener.take() {
        task.abort();
    }
    let _ = rl.save_history(&hist_path);
}

fn spawn_listener(bus: &BusInterface, names: Vec<String>) -> JoinHandle<()> {
    let mut filter = bus.create_event_filter();
    let names = if names.is_empty() {
        vec!["*".to_string()]
    } else {
        names
    };
    for name in &names {
        let _ = filter.listen_event_name(name);
    }
    println!("Listening on {} for {}", filter.path(), names.join(" "));
    tokio::spawn(async move {
        while let Some(notice) = filter.recv().await {
            println!("\n📨 [{}] {}", notice.source, notice.to_line());
        }
    })
}

async fn execute(bus: &BusInterface, compiler: &dyn ScriptCompiler, command: Command) -> Result<(), BusError> {
    match command {
        Command::Nodes => {
            let nodes = bus.nodes_list();
            if nodes.is_empty() {
                println!("No described nodes.");
            }
            for n in nodes {
                println!("{}{:>5}  {}", ICON_PLACEHOLDER, n.id, n.name);
            }
        }
        Command::Vars(node) => {
            for v in bus.variables_list(&node)? {
                println!("{}{}", ICON_PLACEHOLDER, v);
            }
        }
        Command::Get { node, var, cached } => {
            let read = async {
                if cached {
                    bus.peek_variable(&node, &var).await
                } else {
                    bus.get_variable(&node, &var).await
                }
            };
            let values = tokio::time::timeout(CONSOLE_READ_TIMEOUT, read)
                .await
                .map_err(|_| BusError::Failed(format!("no reply from {}", node)))??;
            println!("{}{} = {:?}", ICON_PLACEHOLDER, var, values);
        }
        Command::Set { node, var, values } => bus.set_variable(&node, &var, values)?,
        Command::Emit { event, data } => match event {
            EventRef::Id(id) => bus.send_event(id, data),
            EventRef::Name(name) => {
                bus.send_event_name(&name, data)?;
            }
        },
        Command::Load { file, target } => {
            let source = std::fs::read_to_string(&file)
                .map_err(|e| BusError::InvalidArgs(format!("{}: {}", file, e)))?;
            let bundle = ScriptBundle::parse(&source).map_err(|e| BusError::InvalidArgs(e.to_string()))?;
            let nodes = target_nodes(bus, target.as_deref());
            if nodes.is_empty() {
                return Err(BusError::InvalidArgs("no matching node".into()));
            }
            let report = bus
                .hub()
                .load_bundle(&nodes, &bundle, compiler)
                .map_err(|e| BusError::Failed(e.to_string()))?;
            println!(
                "{}loaded on {:?}; no script for {:?}",
                ICON_PLACEHOLDER, report.loaded, report.unmatched
            );
        }
        Command::Reset(target) => {
            let nodes = target_nodes(bus, target.as_deref());
            if nodes.is_empty() {
                return Err(BusError::InvalidArgs("no matching node".into()));
            }
            for node in nodes {
                bus.hub().reset_node(node)?;
            }
        }
        Command::Status => {
            let status = bus.hub().status();
            println!(
                "{}nodes={} pending_reads={} subscribers={}",
                ICON_PLACEHOLDER, status.described_nodes, status.pending_reads, status.subscribers
            );
            for link in status.links {
                println!(
                    "{}{} {} nodes={:?} sent={} bytes={} received={}",
                    ICON_PLACEHOLDER,
                    link.id,
                    link.target,
                    link.nodes,
                    link.stats.messages_sent,
                    link.stats.bytes_sent,
                    link.stats.messages_received
                );
            }
        }
        Command::Listen(_) | Command::ListenOff | Command::Version | Command::Help | Command::Exit => {}
    }
    Ok(())
}

/// `None` or `all` selects every node; otherwise match by name or id.
fn target_nodes(bus: &BusInterface, target: Option<&str>) -> Vec<u16> {
    let nodes = bus.nodes_list();
    match target {
        None | Some("all") => nodes.iter().map(|n| n.id).collect(),
        Some(t) => nodes
            .iter()
            .filter(|n| n.name == t || t.parse::<u16>().ok() == Some(n.id))
            .map(|n| n.id)
            .collect(),
    }
}

const COMMANDS: &[&str] = &[
    "nodes", "vars", "get", "peek", "set", "emit", "listen", "load", "reset", "status", "version",
    "help", "exit", "quit",
];

/// Completes command words, then node names for commands taking a node.
struct PromptCompleter {
    bus: BusInterface,
}

impl rustyline::Helper for PromptCompleter {}

impl rustyline::hint::Hinter for PromptCompleter {
    type Hint = String;
    fn hint(&self, _line: &str, _pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        None
    }
}

impl rustyline::highlight::Highlighter for PromptCompleter {}

impl rustyline::validate::Validator for PromptCompleter {}

impl rustyline::completion::Completer for PromptCompleter {
    type Candidate = rustyline::completion::Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> Result<(usize, Vec<Self::Candidate>), rustyline::error::ReadlineError> {
        let before = &line[..pos];
        let token_start = before
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
        let current = &before[token_start..];
        let parts: Vec<&str> = before.split_whitespace().collect();
        let position = if current.is_empty() {
            parts.len()
        } else {
            parts.len().saturating_sub(1)
        };

        let candidates: Vec<String> = match (position, parts.first().copied()) {
            (0, _) => COMMANDS.iter().map(|s| s.to_string()).collect(),
            (1, Some("vars" | "get" | "peek" | "set" | "reset")) => {
                self.bus.nodes_list().into_iter().map(|n| n.name).collect()
            }
            (2, Some("get" | "peek" | "set")) => parts
                .get(1)
                .and_then(|node| self.bus.variables_list(node).ok())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let mut out: Vec<Self::Candidate> = candidates
            .into_iter()
            .filter(|c| c.starts_with(current))
            .map(|c| rustyline::completion::Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        out.dedup_by(|a, b| a.replacement == b.replacement);
        Ok((token_start, out))
    }
}
