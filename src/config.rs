//! Configuration types for dirmeta
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Exclude pattern matching

use crate::error::ConfigError;
use crate::track::entry::EntryOptions;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Default sidecar file name written in each tracked directory
pub const DEFAULT_SIDECAR_NAME: &str = ".dirmeta.xml";

/// Default marker file name that stops descent into a directory
pub const DEFAULT_STOP_SENTINEL: &str = ".dirmeta-stop";

/// Maximum reasonable token count
const MAX_TOKENS: usize = 512;

/// Capacity of the tracker's aggregated error stream
const ERROR_BUFFER: usize = 256;

/// Concurrent directory metadata tracker with XML sidecars
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dirmeta",
    version,
    about = "Concurrent directory metadata tracker with XML sidecars",
    long_about = "Walks a directory tree and maintains a hidden XML sidecar in each directory,\n\
                  recording per-file checksums, sizes, and modification times.\n\n\
                  Files whose size and mtime match their sidecar record are not rehashed, and\n\
                  sidecars are only rewritten when their directory actually changed.",
    after_help = "EXAMPLES:\n    \
        dirmeta /data\n    \
        dirmeta /data -t 8 --prune\n    \
        dirmeta /exports/media --exclude '\\.snapshot' --exclude 'tmp$'\n    \
        dirmeta /data --sidecar-name .meta.xml -v"
)]
pub struct CliArgs {
    /// Directory tree to track
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Number of files visited concurrently
    #[arg(
        short = 't',
        long = "tokens",
        default_value_t = default_file_tokens(),
        value_name = "NUM"
    )]
    pub file_tokens: usize,

    /// Number of directories held open concurrently
    #[arg(long, default_value = "2", value_name = "NUM")]
    pub dir_tokens: usize,

    /// Sidecar file name written in each directory (must be hidden)
    #[arg(long, default_value = DEFAULT_SIDECAR_NAME, value_name = "NAME")]
    pub sidecar_name: String,

    /// Marker file name that stops descent into a directory
    #[arg(long, default_value = DEFAULT_STOP_SENTINEL, value_name = "NAME")]
    pub stop_sentinel: String,

    /// Drop sidecar records for files that no longer exist
    #[arg(long)]
    pub prune: bool,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (show errors and warnings)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_file_tokens() -> usize {
    // Hashing saturates a local disk well before it saturates the cores
    num_cpus::get().min(4)
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Canonicalized root of the tracked tree
    pub root: PathBuf,

    /// Concurrent file visit limit
    pub file_tokens: usize,

    /// Concurrent open directory limit
    pub dir_tokens: usize,

    /// Sidecar file name
    pub sidecar_name: String,

    /// Stop sentinel file name
    pub stop_sentinel: String,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Drop records for missing files before persisting
    pub prune: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,

    /// Aggregated error stream capacity
    pub error_buffer: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            file_tokens: default_file_tokens(),
            dir_tokens: 2,
            sidecar_name: DEFAULT_SIDECAR_NAME.to_string(),
            stop_sentinel: DEFAULT_STOP_SENTINEL.to_string(),
            exclude_patterns: Vec::new(),
            prune: false,
            show_progress: false,
            verbose: false,
            error_buffer: ERROR_BUFFER,
        }
    }
}

impl TrackerConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        // Validate token counts
        if args.file_tokens == 0 || args.file_tokens > MAX_TOKENS {
            return Err(ConfigError::InvalidTokenCount {
                count: args.file_tokens,
                max: MAX_TOKENS,
            });
        }
        if args.dir_tokens == 0 || args.dir_tokens > MAX_TOKENS {
            return Err(ConfigError::InvalidTokenCount {
                count: args.dir_tokens,
                max: MAX_TOKENS,
            });
        }

        // Marker files must be hidden bare names so the walk's own
        // dot-file skip keeps them out of the sidecars
        validate_marker_name(&args.sidecar_name)?;
        validate_marker_name(&args.stop_sentinel)?;
        if args.sidecar_name == args.stop_sentinel {
            return Err(ConfigError::InvalidMarkerName {
                name: args.stop_sentinel.clone(),
                reason: "Sentinel name matches the sidecar name".to_string(),
            });
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Resolve the root so skip rules see its real name
        let root = args
            .root
            .canonicalize()
            .map_err(|e| ConfigError::InvalidRoot {
                path: args.root.clone(),
                reason: e.to_string(),
            })?;
        if !root.is_dir() {
            return Err(ConfigError::InvalidRoot {
                path: root,
                reason: "Not a directory".to_string(),
            });
        }

        Ok(Self {
            root,
            file_tokens: args.file_tokens,
            dir_tokens: args.dir_tokens,
            sidecar_name: args.sidecar_name,
            stop_sentinel: args.stop_sentinel,
            exclude_patterns,
            prune: args.prune,
            show_progress: !args.quiet,
            verbose: args.verbose,
            error_buffer: ERROR_BUFFER,
        })
    }

    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.exclude_patterns.iter().any(|re| re.is_match(&text))
    }

    /// Entry options derived from this configuration
    pub fn entry_options(&self) -> EntryOptions {
        EntryOptions {
            sidecar_name: self.sidecar_name.clone(),
            // Tokens bound the jobs in flight; headroom keeps submission
            // from blocking on short bursts
            queue_capacity: self.file_tokens.max(16),
            error_capacity: 16,
            prune: self.prune,
        }
    }
}

fn validate_marker_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(ConfigError::InvalidMarkerName {
            name: name.to_string(),
            reason: "Empty or reserved name".to_string(),
        });
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ConfigError::InvalidMarkerName {
            name: name.to_string(),
            reason: "Must be a bare file name".to_string(),
        });
    }
    if !name.starts_with('.') {
        return Err(ConfigError::InvalidMarkerName {
            name: name.to_string(),
            reason: "Must start with '.'".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn args_for(root: &Path) -> CliArgs {
        CliArgs {
            root: root.to_path_buf(),
            file_tokens: 4,
            dir_tokens: 2,
            sidecar_name: DEFAULT_SIDECAR_NAME.to_string(),
            stop_sentinel: DEFAULT_STOP_SENTINEL.to_string(),
            prune: false,
            exclude_patterns: Vec::new(),
            quiet: true,
            verbose: false,
        }
    }

    #[test]
    fn test_from_args_accepts_valid_input() {
        let tmp = tempdir().unwrap();
        let config = TrackerConfig::from_args(args_for(tmp.path())).unwrap();
        assert!(config.root.is_dir());
        assert_eq!(config.file_tokens, 4);
        assert_eq!(config.sidecar_name, DEFAULT_SIDECAR_NAME);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_from_args_rejects_bad_token_counts() {
        let tmp = tempdir().unwrap();

        let mut args = args_for(tmp.path());
        args.file_tokens = 0;
        assert!(TrackerConfig::from_args(args).is_err());

        let mut args = args_for(tmp.path());
        args.dir_tokens = 100_000;
        assert!(TrackerConfig::from_args(args).is_err());
    }

    #[test]
    fn test_marker_names_must_be_hidden_bare_names() {
        let tmp = tempdir().unwrap();

        let mut args = args_for(tmp.path());
        args.sidecar_name = "meta.xml".to_string();
        assert!(matches!(
            TrackerConfig::from_args(args),
            Err(ConfigError::InvalidMarkerName { .. })
        ));

        let mut args = args_for(tmp.path());
        args.stop_sentinel = "sub/.stop".to_string();
        assert!(matches!(
            TrackerConfig::from_args(args),
            Err(ConfigError::InvalidMarkerName { .. })
        ));
    }

    #[test]
    fn test_marker_names_must_differ() {
        let tmp = tempdir().unwrap();
        let mut args = args_for(tmp.path());
        args.stop_sentinel = args.sidecar_name.clone();
        assert!(TrackerConfig::from_args(args).is_err());
    }

    #[test]
    fn test_bad_exclude_pattern_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut args = args_for(tmp.path());
        args.exclude_patterns = vec!["[unclosed".to_string()];
        assert!(matches!(
            TrackerConfig::from_args(args),
            Err(ConfigError::InvalidExcludePattern { .. })
        ));
    }

    #[test]
    fn test_root_must_exist_and_be_a_directory() {
        let tmp = tempdir().unwrap();

        let args = args_for(&tmp.path().join("missing"));
        assert!(matches!(
            TrackerConfig::from_args(args),
            Err(ConfigError::InvalidRoot { .. })
        ));

        let file = tmp.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        let args = args_for(&file);
        assert!(matches!(
            TrackerConfig::from_args(args),
            Err(ConfigError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_exclude_pattern_matching() {
        let config = TrackerConfig {
            exclude_patterns: vec![Regex::new(r"\.snapshot").unwrap()],
            ..TrackerConfig::default()
        };

        assert!(config.is_excluded(Path::new("/data/.snapshot/hourly.0")));
        assert!(!config.is_excluded(Path::new("/data/myfile.txt")));
    }

    #[test]
    fn test_entry_options_follow_config() {
        let config = TrackerConfig {
            file_tokens: 2,
            prune: true,
            ..TrackerConfig::default()
        };
        let options = config.entry_options();
        assert_eq!(options.sidecar_name, DEFAULT_SIDECAR_NAME);
        assert_eq!(options.queue_capacity, 16);
        assert!(options.prune);
    }
}
