use std::path::PathBuf;

use regex::Regex;

/// The on-disk/YAML shape of the recognised cache options. Deserializing one
/// of these is the responsibility of an out-of-scope configuration loader;
/// this type only describes the shape it produces.
#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// LRU byte budget in MiB; `-1` means unbounded.
    pub max_size_mb: i64,
    pub cache_dir: PathBuf,
    pub cache_file_for_range_read: bool,
    pub download_chunk_size_mb: u64,
    /// `0` means effectively unbounded.
    pub max_parallel_downloads: usize,
    pub exclude_regex: Option<String>,
    pub include_regex: Option<String>,
    pub enable_crc: bool,
    pub enable_o_direct: bool,
}

/// Errors that can occur while turning a [`RawConfig`] into a [`Config`] —
/// currently only malformed regular expressions.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid exclude_regex: {0}")]
    ExcludeRegex(#[source] regex::Error),
    #[error("invalid include_regex: {0}")]
    IncludeRegex(#[source] regex::Error),
}

/// The validated, pre-compiled configuration the coordinator is built from.
///
/// Building a `Config` never touches disk or the environment — it is a pure
/// function of a `RawConfig`. Numeric options are pre-converted to the units
/// the hot path wants (bytes, not MiB), and the two regex options are
/// pre-compiled so `acquire` never compiles a pattern.
#[derive(Clone, Debug)]
pub struct Config {
    pub max_bytes: u64,
    pub cache_dir: PathBuf,
    pub cache_file_for_range_read: bool,
    pub download_chunk_size: u64,
    pub max_parallel_downloads: Option<usize>,
    pub exclude_regex: Option<Regex>,
    pub include_regex: Option<Regex>,
    pub enable_crc: bool,
    pub enable_o_direct: bool,
}

const MIB: u64 = 1024 * 1024;

impl Config {
    pub fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let max_bytes = if raw.max_size_mb < 0 {
            u64::MAX
        } else {
            raw.max_size_mb as u64 * MIB
        };

        let download_chunk_size = if raw.download_chunk_size_mb == 0 {
            2 * MIB
        } else {
            raw.download_chunk_size_mb * MIB
        };

        let max_parallel_downloads = match raw.max_parallel_downloads {
            0 => None,
            n => Some(n),
        };

        let exclude_regex = raw
            .exclude_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(ConfigError::ExcludeRegex)?;
        let include_regex = raw
            .include_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(ConfigError::IncludeRegex)?;

        Ok(Self {
            max_bytes,
            cache_dir: raw.cache_dir.clone(),
            cache_file_for_range_read: raw.cache_file_for_range_read,
            download_chunk_size,
            max_parallel_downloads,
            exclude_regex,
            include_regex,
            enable_crc: raw.enable_crc,
            enable_o_direct: raw.enable_o_direct,
        })
    }

    /// Root directory under which cached object files are stored:
    /// `{cache_dir}/file-cache`.
    pub fn file_cache_root(&self) -> PathBuf {
        self.cache_dir.join("file-cache")
    }
}
