use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use stratum_config::{ConfigLoader, StratumConfig};
use stratum_core::{ConfigSource, Event, Result, StratumError, Value};
use stratum_engine::{Manager, listener_fn, module_listener_fn};
use stratum_sources::{EnvSource, FileHandler, FileSource, MemorySource};

/// Stratum: layered runtime configuration with change notification
#[derive(Parser)]
#[command(name = "stratum", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to stratum.toml settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Print the merged configuration
    Dump {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Include the owning source of every key
        #[arg(long)]
        with_sources: bool,
    },
    /// Print the merged value of one key
    Get { key: String },
    /// List registered sources by name and priority
    Sources {
        /// Print every source's own key set as JSON instead
        #[arg(long)]
        snapshot: bool,
    },
    /// Print change events until Ctrl-C
    Watch {
        /// Key patterns (regular expressions); defaults to every key
        patterns: Vec<String>,
        /// Module prefixes to receive batched events for
        #[arg(short, long = "module")]
        modules: Vec<String>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load settings first so we can use them for the log format
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > settings
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_logging(log_level, &config.logging.format);

        let manager = build_manager(&config, &loader)?;
        let outcome = match self.command {
            Commands::Dump { json, with_sources } => Self::cmd_dump(&manager, json, with_sources),
            Commands::Get { key } => Self::cmd_get(&manager, &key),
            Commands::Sources { snapshot } => Self::cmd_sources(&manager, snapshot),
            Commands::Watch { patterns, modules } => {
                Self::cmd_watch(&manager, patterns, modules).await
            }
        };

        if let Err(e) = manager.shutdown().await {
            warn!(error = %e, "shutdown reported an error");
        }
        outcome
    }

    fn cmd_dump(manager: &Manager, json: bool, with_sources: bool) -> Result<()> {
        let entries: BTreeMap<String, _> = manager.configs_with_sources().into_iter().collect();
        if json {
            let out = if with_sources {
                serde_json::to_string_pretty(&entries)?
            } else {
                let values: BTreeMap<&String, &Value> =
                    entries.iter().map(|(k, v)| (k, &v.value)).collect();
                serde_json::to_string_pretty(&values)?
            };
            println!("{out}");
            return Ok(());
        }

        if entries.is_empty() {
            println!("(no configuration)");
        }
        for (key, entry) in &entries {
            if with_sources {
                println!("{key} = {}  [{}]", render(&entry.value), entry.source);
            } else {
                println!("{key} = {}", render(&entry.value));
            }
        }
        Ok(())
    }

    fn cmd_get(manager: &Manager, key: &str) -> Result<()> {
        let value = manager
            .get(key)
            .ok_or_else(|| StratumError::KeyNotExist(key.to_string()))?;
        println!("{}", render(&value));
        Ok(())
    }

    fn cmd_sources(manager: &Manager, snapshot: bool) -> Result<()> {
        if snapshot {
            manager.marshal(std::io::stdout().lock())?;
            println!();
            return Ok(());
        }
        let sources = manager.sources();
        if sources.is_empty() {
            println!("(no sources)");
        }
        for source in sources {
            println!("{:<24} priority {}", source.name, source.priority);
        }
        Ok(())
    }

    async fn cmd_watch(
        manager: &Manager,
        patterns: Vec<String>,
        modules: Vec<String>,
    ) -> Result<()> {
        let patterns = if patterns.is_empty() && modules.is_empty() {
            vec![".*".to_string()]
        } else {
            patterns
        };

        if !patterns.is_empty() {
            let refs: Vec<&str> = patterns.iter().map(String::as_str).collect();
            let printer = listener_fn(|event| println!("{}", describe(&event)));
            manager.register_listener(printer, &refs)?;
        }
        if !modules.is_empty() {
            let refs: Vec<&str> = modules.iter().map(String::as_str).collect();
            manager.register_module_listener(
                module_listener_fn(|events: Vec<Event>| {
                    println!("-- {} change(s)", events.len());
                    for event in &events {
                        println!("   {}", describe(event));
                    }
                }),
                &refs,
            )?;
        }

        info!(?patterns, ?modules, "watching for changes, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        Ok(())
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Start the engine and register the sources enabled in `config`.
fn build_manager(config: &StratumConfig, loader: &ConfigLoader) -> Result<Arc<Manager>> {
    let manager = Manager::start(config.engine.queue_capacity)?;
    let sources = &config.sources;

    if sources.memory.enabled {
        let memory = MemorySource::new();
        memory.set_priority(sources.memory.priority);
        manager.add_source(Arc::new(memory))?;
    }

    if sources.env.enabled {
        let env = EnvSource::new();
        env.set_priority(sources.env.priority);
        manager.add_source(Arc::new(env))?;
    }

    let entries = loader.file_entries();
    if !entries.is_empty() {
        let files = FileSource::new();
        files.set_priority(sources.file.priority);
        for entry in entries {
            if !entry.required && !entry.path.exists() {
                warn!(path = %entry.path.display(), "optional file not found, skipping");
                continue;
            }
            let handler: FileHandler = entry.handler.parse()?;
            files
                .add_file_with(&entry.path, entry.priority, handler)
                .with_context(|| format!("failed to load {}", entry.path.display()))?;
        }
        manager.add_source(Arc::new(files))?;
    }

    Ok(manager)
}

/// Strings print bare, everything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe(event: &Event) -> String {
    format!(
        "{} {} = {} [{}]",
        event.kind,
        event.key,
        render(&event.value),
        event.source
    )
}
