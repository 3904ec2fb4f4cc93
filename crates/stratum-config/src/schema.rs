use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root settings, maps to `stratum.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub sources: SourcesConfig,
}

// ── Engine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pushes sources may have in flight before their sends wait.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Sources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub env: EnvSourceConfig,
    pub memory: MemorySourceConfig,
    /// Settings for the file source as a whole.
    pub file: FileSourceConfig,
    /// Files (or directories) fed to the file source.
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSourceConfig {
    pub enabled: bool,
    pub priority: i32,
}

impl Default for EnvSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySourceConfig {
    pub enabled: bool,
    pub priority: i32,
}

impl Default for MemorySourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    pub priority: i32,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self { priority: 4 }
    }
}

/// One `[[sources.files]]` entry. Relative paths are taken from the
/// directory holding `stratum.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Lower wins when two files define the same key.
    #[serde(default)]
    pub priority: u32,
    /// A missing required file stops startup; a missing optional one is skipped.
    #[serde(default = "default_true")]
    pub required: bool,
    /// "flatten" (parse and flatten by extension) or "file_name_as_key".
    #[serde(default = "default_handler")]
    pub handler: String,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            priority: 0,
            required: true,
            handler: default_handler(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_handler() -> String {
    "flatten".into()
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];
const FILE_HANDLERS: [&str; 2] = ["flatten", "file_name_as_key"];

impl StratumConfig {
    /// Validate the settings and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.engine.queue_capacity == 0 {
            warnings.push(ConfigWarning {
                field: "engine.queue_capacity".into(),
                message: "queue capacity is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1024".into()),
            });
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", LOG_FORMATS.join(", "))),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", LOG_LEVELS.join(", "))),
            });
        }

        for (i, entry) in self.sources.files.iter().enumerate() {
            let field = format!("sources.files[{i}].path");
            if entry.path.as_os_str().is_empty() {
                warnings.push(ConfigWarning {
                    field,
                    message: "path is empty".into(),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            } else if entry.path.is_absolute() && !entry.path.exists() {
                let (severity, hint) = if entry.required {
                    (
                        WarningSeverity::Error,
                        "Create it, or set `required = false` to skip it while missing",
                    )
                } else {
                    (WarningSeverity::Info, "Optional, skipped until it exists")
                };
                warnings.push(ConfigWarning {
                    field,
                    message: format!("{} does not exist", entry.path.display()),
                    severity,
                    hint: Some(hint.into()),
                });
            }

            if !FILE_HANDLERS.contains(&entry.handler.as_str()) {
                warnings.push(ConfigWarning {
                    field: format!("sources.files[{i}].handler"),
                    message: format!("unknown file handler '{}'", entry.handler),
                    severity: WarningSeverity::Error,
                    hint: Some(format!("Valid values: {}", FILE_HANDLERS.join(", "))),
                });
            }
        }

        let sources = &self.sources;
        if !sources.env.enabled && !sources.memory.enabled && sources.files.is_empty() {
            warnings.push(ConfigWarning {
                field: "sources".into(),
                message: "no sources enabled, the merged view will stay empty".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
