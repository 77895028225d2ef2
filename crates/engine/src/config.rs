use std::path::PathBuf;
use std::time::Duration;

use redolink_common::{RedoError, Result, Scn, Seq};
use serde::Deserialize;

/// `disable-checks` bits.
pub mod disable_checks {
    pub const BLOCK_SUM: u32 = 1 << 0;
    pub const SUPPLEMENTAL_LOG: u32 = 1 << 1;
    pub const JSON_TAGS: u32 = 1 << 2;
}

/// `flags` bits.
pub mod flags {
    pub const SCHEMALESS: u64 = 1 << 0;
    pub const ADAPTIVE_SCHEMA: u64 = 1 << 1;
    pub const SHOW_DDL: u64 = 1 << 2;
    pub const SHOW_HIDDEN_COLUMNS: u64 = 1 << 3;
    pub const SHOW_GUARD_COLUMNS: u64 = 1 << 4;
    pub const SHOW_NESTED_COLUMNS: u64 = 1 << 5;
    pub const SHOW_UNUSED_COLUMNS: u64 = 1 << 6;
    pub const EXPERIMENTAL_XMLTYPE: u64 = 1 << 7;
    pub const EXPERIMENTAL_JSON: u64 = 1 << 8;
    pub const EXPERIMENTAL_NOT_NULL_MISSING: u64 = 1 << 9;
    pub const DIRECT_DISABLE: u64 = 1 << 10;
    pub const ARCH_ONLY: u64 = 1 << 11;
    pub const CHECKPOINT_KEEP: u64 = 1 << 12;
}

fn parse_disable_check(name: &str) -> Result<u32> {
    Ok(match name {
        "BLOCK_SUM" => disable_checks::BLOCK_SUM,
        "SUPPLEMENTAL_LOG" => disable_checks::SUPPLEMENTAL_LOG,
        "JSON_TAGS" => disable_checks::JSON_TAGS,
        other => {
            return Err(RedoError::Configuration(format!(
                "unknown disable-checks entry {:?}",
                other
            )))
        }
    })
}

fn parse_flag(name: &str) -> Result<u64> {
    Ok(match name {
        "SCHEMALESS" => flags::SCHEMALESS,
        "ADAPTIVE_SCHEMA" => flags::ADAPTIVE_SCHEMA,
        "SHOW_DDL" => flags::SHOW_DDL,
        "SHOW_HIDDEN_COLUMNS" => flags::SHOW_HIDDEN_COLUMNS,
        "SHOW_GUARD_COLUMNS" => flags::SHOW_GUARD_COLUMNS,
        "SHOW_NESTED_COLUMNS" => flags::SHOW_NESTED_COLUMNS,
        "SHOW_UNUSED_COLUMNS" => flags::SHOW_UNUSED_COLUMNS,
        "EXPERIMENTAL_XMLTYPE" => flags::EXPERIMENTAL_XMLTYPE,
        "EXPERIMENTAL_JSON" => flags::EXPERIMENTAL_JSON,
        "EXPERIMENTAL_NOT_NULL_MISSING" => flags::EXPERIMENTAL_NOT_NULL_MISSING,
        "DIRECT_DISABLE" => flags::DIRECT_DISABLE,
        "ARCH_ONLY" => flags::ARCH_ONLY,
        "CHECKPOINT_KEEP" => flags::CHECKPOINT_KEEP,
        other => {
            return Err(RedoError::Configuration(format!("unknown flag {:?}", other)))
        }
    })
}

/// Where replication starts when no checkpoint exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Now,
    Scn(Scn),
    Sequence(Seq),
    Time(u32),
    TimeRelative(u64),
}

/// One replicated-table entry of the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct TableEntry {
    pub owner: String,
    pub table: String,
    #[serde(default)]
    pub key: Vec<String>,
    pub condition: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub full_update: bool,
}

/// Raw TOML shape; validated into `Config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawConfig {
    database: String,
    #[serde(default)]
    online_logs: Vec<PathBuf>,
    archive_dir: Option<PathBuf>,
    #[serde(default = "default_archive_format")]
    log_archive_format: String,
    #[serde(default = "default_state_dir")]
    state_dir: PathBuf,
    #[serde(default)]
    path_mapping: Vec<String>,

    #[serde(default = "default_memory_min")]
    memory_min_mb: usize,
    #[serde(default = "default_memory_max")]
    memory_max_mb: usize,
    #[serde(default = "default_read_buffer")]
    read_buffer_max: usize,

    #[serde(default = "default_checkpoint_interval_s")]
    checkpoint_interval_s: u64,
    #[serde(default = "default_checkpoint_interval_mb")]
    checkpoint_interval_mb: u64,
    #[serde(default = "default_checkpoint_keep")]
    checkpoint_keep: usize,

    #[serde(default = "default_arch_read_sleep_us")]
    arch_read_sleep_us: u64,
    #[serde(default = "default_arch_read_tries")]
    arch_read_tries: u32,
    #[serde(default = "default_redo_read_sleep_us")]
    redo_read_sleep_us: u64,
    #[serde(default = "default_refresh_interval_us")]
    refresh_interval_us: u64,

    #[serde(default)]
    disable_checks: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,

    start_scn: Option<u64>,
    start_sequence: Option<u32>,
    start_time: Option<u32>,
    start_time_rel: Option<u64>,

    #[serde(default)]
    tables: Vec<TableEntry>,
}

fn default_archive_format() -> String {
    "o1_mf_%t_%s_%h_.arc".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_memory_min() -> usize {
    32
}

fn default_memory_max() -> usize {
    1024
}

fn default_read_buffer() -> usize {
    64
}

fn default_checkpoint_interval_s() -> u64 {
    10
}

fn default_checkpoint_interval_mb() -> u64 {
    500
}

fn default_checkpoint_keep() -> usize {
    100
}

fn default_arch_read_sleep_us() -> u64 {
    10_000_000
}

fn default_arch_read_tries() -> u32 {
    3
}

fn default_redo_read_sleep_us() -> u64 {
    50_000
}

fn default_refresh_interval_us() -> u64 {
    10_000_000
}

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: String,
    pub online_logs: Vec<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub log_archive_format: String,
    pub state_dir: PathBuf,
    pub path_mapping: Vec<(String, String)>,

    pub memory_min_mb: usize,
    pub memory_max_mb: usize,
    pub read_buffer_max: usize,

    pub checkpoint_interval: Duration,
    pub checkpoint_interval_bytes: u64,
    pub checkpoint_keep: usize,

    pub arch_read_sleep: Duration,
    pub arch_read_tries: u32,
    pub redo_read_sleep: Duration,
    pub refresh_interval: Duration,

    pub disable_checks: u32,
    pub flags: u64,
    pub start: StartPosition,
    pub tables: Vec<TableEntry>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config> {
        let raw: RawConfig = toml::from_str(text)
            .map_err(|e| RedoError::Configuration(format!("config parse: {}", e)))?;
        Config::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Config> {
        if raw.database.is_empty() {
            return Err(RedoError::Configuration("database name is empty".into()));
        }
        if raw.memory_min_mb == 0 || raw.memory_min_mb > raw.memory_max_mb {
            return Err(RedoError::Configuration(format!(
                "memory-min-mb {} must be within 1..=memory-max-mb {}",
                raw.memory_min_mb, raw.memory_max_mb
            )));
        }
        if raw.read_buffer_max < 2 {
            return Err(RedoError::Configuration(
                "read-buffer-max must be at least 2 blocks".into(),
            ));
        }

        let mut disable = 0u32;
        for name in &raw.disable_checks {
            disable |= parse_disable_check(name)?;
        }
        let mut flag_bits = 0u64;
        for name in &raw.flags {
            flag_bits |= parse_flag(name)?;
        }

        if raw.start_time.is_some() && raw.start_time_rel.is_some() {
            return Err(RedoError::Configuration(
                "start-time and start-time-rel are mutually exclusive".into(),
            ));
        }
        let time_forms = [
            raw.start_scn.is_some(),
            raw.start_sequence.is_some(),
            raw.start_time.is_some() || raw.start_time_rel.is_some(),
        ];
        if time_forms.iter().filter(|set| **set).count() > 1 {
            return Err(RedoError::Configuration(
                "at most one of start-scn, start-sequence and the start-time forms is allowed"
                    .into(),
            ));
        }
        let start = if let Some(scn) = raw.start_scn {
            StartPosition::Scn(Scn(scn))
        } else if let Some(seq) = raw.start_sequence {
            StartPosition::Sequence(Seq(seq))
        } else if let Some(time) = raw.start_time {
            StartPosition::Time(time)
        } else if let Some(rel) = raw.start_time_rel {
            StartPosition::TimeRelative(rel)
        } else {
            StartPosition::Now
        };

        let mut path_mapping = Vec::new();
        for entry in &raw.path_mapping {
            let (source, target) = entry.split_once(':').ok_or_else(|| {
                RedoError::Configuration(format!(
                    "path-mapping entry {:?} is not source:target",
                    entry
                ))
            })?;
            path_mapping.push((source.to_string(), target.to_string()));
        }

        Ok(Config {
            database: raw.database,
            online_logs: raw.online_logs,
            archive_dir: raw.archive_dir,
            log_archive_format: raw.log_archive_format,
            state_dir: raw.state_dir,
            path_mapping,
            memory_min_mb: raw.memory_min_mb,
            memory_max_mb: raw.memory_max_mb,
            read_buffer_max: raw.read_buffer_max,
            checkpoint_interval: Duration::from_secs(raw.checkpoint_interval_s),
            checkpoint_interval_bytes: raw.checkpoint_interval_mb * 1024 * 1024,
            checkpoint_keep: raw.checkpoint_keep,
            arch_read_sleep: Duration::from_micros(raw.arch_read_sleep_us),
            arch_read_tries: raw.arch_read_tries,
            redo_read_sleep: Duration::from_micros(raw.redo_read_sleep_us),
            refresh_interval: Duration::from_micros(raw.refresh_interval_us),
            disable_checks: disable,
            flags: flag_bits,
            start,
            tables: raw.tables,
        })
    }

    pub fn has_flag(&self, bit: u64) -> bool {
        self.flags & bit != 0
    }

    pub fn check_disabled(&self, bit: u32) -> bool {
        self.disable_checks & bit != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
database = "ORCL"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.database, "ORCL");
        assert_eq!(config.memory_min_mb, 32);
        assert_eq!(config.checkpoint_keep, 100);
        assert_eq!(config.start, StartPosition::Now);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
database = "ORCL"
online-logs = ["/redo/redo01.log"]
archive-dir = "/arch"
log-archive-format = "arch_%s.log"
memory-min-mb = 64
memory-max-mb = 128
read-buffer-max = 32
checkpoint-interval-s = 5
checkpoint-interval-mb = 100
checkpoint-keep = 10
disable-checks = ["BLOCK_SUM"]
flags = ["SCHEMALESS", "ARCH_ONLY"]
start-scn = 5000
path-mapping = ["/u01:/mnt"]

[[tables]]
owner = "SCOTT"
table = ".*"
condition = "DNAME != 'TEMP'"
"#;
        let config = Config::from_toml(text).unwrap();
        assert!(config.check_disabled(disable_checks::BLOCK_SUM));
        assert!(!config.check_disabled(disable_checks::SUPPLEMENTAL_LOG));
        assert!(config.has_flag(flags::SCHEMALESS));
        assert!(config.has_flag(flags::ARCH_ONLY));
        assert_eq!(config.start, StartPosition::Scn(Scn(5000)));
        assert_eq!(config.path_mapping, vec![("/u01".to_string(), "/mnt".to_string())]);
        assert_eq!(config.tables.len(), 1);
    }

    #[test]
    fn test_conflicting_start_positions_rejected() {
        let text = r#"
database = "ORCL"
start-scn = 5000
start-sequence = 42
"#;
        assert!(Config::from_toml(text).is_err());

        let text = r#"
database = "ORCL"
start-time = 100
start-time-rel = 200
"#;
        assert!(Config::from_toml(text).is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let text = r#"
database = "ORCL"
no-such-option = true
"#;
        assert!(Config::from_toml(text).is_err());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let text = r#"
database = "ORCL"
flags = ["NOT_A_FLAG"]
"#;
        assert!(Config::from_toml(text).is_err());
    }

    #[test]
    fn test_bad_memory_bounds_rejected() {
        let text = r#"
database = "ORCL"
memory-min-mb = 64
memory-max-mb = 32
"#;
        assert!(Config::from_toml(text).is_err());
    }
}
