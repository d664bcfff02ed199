//! Runtime configuration
//!
//! Values come from an optional TOML file (`VOCALIS_CONFIG_FILE`) overlaid by
//! `VOCALIS_*` environment variables. Invalid environment values fall back to
//! the file or default value instead of aborting startup; the rejected values
//! are kept in [`Config::warnings`] so they can be reported once logging is up.
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `VOCALIS_LOG_LEVEL` | info | Tracing filter directive |
//! | `VOCALIS_LOG_FORMAT` | pretty | `pretty` or `json` |
//! | `VOCALIS_CACHE_DIR` | hub cache | Model cache root |
//! | `VOCALIS_CATALOG_URL` | https://huggingface.co | Model catalog endpoint |
//! | `VOCALIS_HF_TOKEN` / `HF_TOKEN` | unset | Catalog bearer token |
//! | `VOCALIS_<FAMILY>__DEVICE` | auto | `cpu`, `cuda` or `auto` |
//! | `VOCALIS_<FAMILY>__DEVICE_INDEX` | 0 | Accelerator index |
//! | `VOCALIS_<FAMILY>__COMPUTE_TYPE` | default | Weight quantization |
//! | `VOCALIS_<FAMILY>__TTL` | 300 | Idle seconds; -1 never, 0 immediate |
//! | `VOCALIS_<FAMILY>__CPU_THREADS` | 0 | Inference threads (0 = auto) |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::BaseDirs;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::logging::{LogConfig, LogFormat};
use crate::ttl::Ttl;
use crate::types::{Device, Quantization};

pub const DEFAULT_CATALOG_URL: &str = "https://huggingface.co";

/// Model families served by vocalis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Whisper,
    Parakeet,
    Piper,
    Kokoro,
    Pyannote,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::Whisper,
        Family::Parakeet,
        Family::Piper,
        Family::Kokoro,
        Family::Pyannote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Whisper => "whisper",
            Family::Parakeet => "parakeet",
            Family::Piper => "piper",
            Family::Kokoro => "kokoro",
            Family::Pyannote => "pyannote",
        }
    }

    fn env_prefix(&self) -> String {
        format!("VOCALIS_{}__", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Family::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LifecycleError::Config(format!("unknown model family: {s}")))
    }
}

/// Per-family inference and lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyConfig {
    pub device: Device,
    pub device_index: u32,
    pub compute_type: Quantization,
    /// Idle time-to-live in signed seconds
    pub ttl: Ttl,
    /// Inference threads (0 = auto)
    pub cpu_threads: u32,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            device: Device::Auto,
            device_index: 0,
            compute_type: Quantization::Default,
            ttl: Ttl::default(),
            cpu_threads: 0,
        }
    }
}

impl FamilyConfig {
    /// Concrete settings for a loader; `Auto` device and zero threads resolved
    pub fn inference_options(&self) -> InferenceOptions {
        let cpu_threads = match self.cpu_threads {
            0 => std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            n => n,
        };
        InferenceOptions {
            device: self.device.resolve(),
            device_index: self.device_index,
            compute_type: self.compute_type,
            cpu_threads,
        }
    }
}

/// Settings a family loader applies when constructing a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InferenceOptions {
    pub device: Device,
    pub device_index: u32,
    pub compute_type: Quantization,
    pub cpu_threads: u32,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub cache_dir: PathBuf,
    pub catalog_url: String,
    /// Bearer token for the catalog; only read from the environment
    #[serde(skip)]
    pub hf_token: Option<SecretString>,
    pub families: BTreeMap<Family, FamilyConfig>,
    /// Environment values that were rejected while loading
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            cache_dir: default_cache_dir(|key| std::env::var(key).ok()),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            hf_token: None,
            families: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `VOCALIS_CONFIG_FILE` (if set) and the process environment
    pub fn load() -> Result<Self, LifecycleError> {
        let base = match std::env::var("VOCALIS_CONFIG_FILE") {
            Ok(path) => Config::from_file(Path::new(&path))?,
            Err(_) => Config::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok()))
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self, LifecycleError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Config::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, LifecycleError> {
        toml::from_str(text).map_err(|e| LifecycleError::Config(e.to_string()))
    }

    /// Overlay environment variables read through `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        if let Some(level) = lookup("VOCALIS_LOG_LEVEL") {
            self.log.level = level;
        }
        self.log.format = parse_or(&lookup, "VOCALIS_LOG_FORMAT", self.log.format, &mut warnings);
        if let Some(dir) = lookup("VOCALIS_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("VOCALIS_CATALOG_URL") {
            self.catalog_url = url.trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup("VOCALIS_HF_TOKEN").or_else(|| lookup("HF_TOKEN")) {
            if !token.trim().is_empty() {
                self.hf_token = Some(SecretString::new(token));
            }
        }

        for family in Family::ALL {
            let prefix = family.env_prefix();
            let current = self.family(family);
            let key = |name: &str| format!("{prefix}{name}");
            let w = &mut warnings;
            let ttl = parse_or(&lookup, &key("TTL"), current.ttl.as_secs(), w);
            let updated = FamilyConfig {
                device: parse_or(&lookup, &key("DEVICE"), current.device, w),
                device_index: parse_or(&lookup, &key("DEVICE_INDEX"), current.device_index, w),
                compute_type: parse_or(&lookup, &key("COMPUTE_TYPE"), current.compute_type, w),
                ttl: Ttl::from_secs(ttl).unwrap_or_else(|e| {
                    w.push(format!("{}TTL: {}, using {}", prefix, e, current.ttl));
                    current.ttl
                }),
                cpu_threads: parse_or(&lookup, &key("CPU_THREADS"), current.cpu_threads, w),
            };
            if updated != FamilyConfig::default() || self.families.contains_key(&family) {
                self.families.insert(family, updated);
            }
        }
        self.warnings.append(&mut warnings);
        self
    }

    /// Settings for one family, defaults when not configured
    pub fn family(&self, family: Family) -> FamilyConfig {
        self.families.get(&family).cloned().unwrap_or_default()
    }
}

/// Parse an optional variable, keeping `default` when unset or invalid
fn parse_or<T, F>(lookup: &F, key: &str, default: T, warnings: &mut Vec<String>) -> T
where
    T: FromStr + fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warnings.push(format!("Invalid value {:?} for {}, using {}", raw, key, default));
            default
        }),
        None => default,
    }
}

/// Hub cache location: `HF_HUB_CACHE`, `HF_HOME/hub`, else the platform cache
fn default_cache_dir<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("HF_HUB_CACHE") {
        return PathBuf::from(dir);
    }
    if let Some(home) = lookup("HF_HOME") {
        return PathBuf::from(home).join("hub");
    }
    BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join("huggingface").join("hub"))
        .unwrap_or_else(|| PathBuf::from(".cache").join("huggingface").join("hub"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default().with_env(env(&[]));
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.log, LogConfig::default());
        assert!(config.hf_token.is_none());

        let whisper = config.family(Family::Whisper);
        assert_eq!(whisper.ttl, Ttl::After(Duration::from_secs(300)));
        assert_eq!(whisper.device, Device::Auto);
        assert_eq!(whisper.compute_type, Quantization::Default);
    }

    #[test]
    fn test_family_env_overrides() {
        let config = Config::default().with_env(env(&[
            ("VOCALIS_WHISPER__TTL", "-1"),
            ("VOCALIS_WHISPER__DEVICE", "cuda"),
            ("VOCALIS_WHISPER__COMPUTE_TYPE", "int8_float16"),
            ("VOCALIS_PIPER__TTL", "0"),
            ("VOCALIS_KOKORO__CPU_THREADS", "4"),
        ]));

        let whisper = config.family(Family::Whisper);
        assert_eq!(whisper.ttl, Ttl::Never);
        assert_eq!(whisper.device, Device::Cuda);
        assert_eq!(whisper.compute_type, Quantization::Int8Float16);
        assert_eq!(config.family(Family::Piper).ttl, Ttl::Immediate);
        assert_eq!(config.family(Family::Kokoro).cpu_threads, 4);
        assert_eq!(config.family(Family::Parakeet), FamilyConfig::default());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::default().with_env(env(&[
            ("VOCALIS_PYANNOTE__TTL", "-5"),
            ("VOCALIS_PYANNOTE__DEVICE", "tpu"),
            ("VOCALIS_LOG_FORMAT", "xml"),
        ]));
        let pyannote = config.family(Family::Pyannote);
        assert_eq!(pyannote.ttl, Ttl::default());
        assert_eq!(pyannote.device, Device::Auto);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_rejected_values_are_kept_for_reporting() {
        let config = Config::default().with_env(env(&[
            ("VOCALIS_WHISPER__TTL", "-5"),
            ("VOCALIS_KOKORO__CPU_THREADS", "lots"),
        ]));
        assert_eq!(config.warnings.len(), 2);
        assert!(config.warnings.iter().any(|w| w.starts_with("VOCALIS_WHISPER__TTL")));
        assert!(config
            .warnings
            .iter()
            .any(|w| w.contains("\"lots\"") && w.contains("VOCALIS_KOKORO__CPU_THREADS")));

        let clean = Config::default().with_env(env(&[("VOCALIS_WHISPER__TTL", "-1")]));
        assert!(clean.warnings.is_empty());
    }

    #[test]
    fn test_token_and_catalog() {
        let config = Config::default().with_env(env(&[
            ("HF_TOKEN", "hf_secret"),
            ("VOCALIS_CATALOG_URL", "http://127.0.0.1:9000/"),
            ("VOCALIS_CACHE_DIR", "/tmp/vocalis-hub"),
        ]));
        assert_eq!(config.hf_token.as_ref().unwrap().expose_secret(), "hf_secret");
        assert_eq!(config.catalog_url, "http://127.0.0.1:9000");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/vocalis-hub"));
    }

    #[test]
    fn test_toml_then_env() {
        let text = r#"
            catalog_url = "http://catalog.local"

            [log]
            format = "json"

            [families.parakeet]
            ttl = 60
            device = "cpu"
        "#;
        let config = Config::from_toml(text)
            .unwrap()
            .with_env(env(&[("VOCALIS_PARAKEET__CPU_THREADS", "2")]));

        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "info");
        let parakeet = config.family(Family::Parakeet);
        assert_eq!(parakeet.ttl, Ttl::After(Duration::from_secs(60)));
        assert_eq!(parakeet.device, Device::Cpu);
        assert_eq!(parakeet.cpu_threads, 2);
    }

    #[test]
    fn test_toml_rejects_bad_ttl() {
        assert!(Config::from_toml("[families.whisper]\nttl = -3\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocalis.toml");
        std::fs::write(&path, "cache_dir = \"/data/hub\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/data/hub"));
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_hub_cache_resolution() {
        assert_eq!(
            default_cache_dir(env(&[("HF_HUB_CACHE", "/srv/hub")])),
            PathBuf::from("/srv/hub")
        );
        assert_eq!(
            default_cache_dir(env(&[("HF_HOME", "/srv/hf")])),
            PathBuf::from("/srv/hf/hub")
        );
    }

    #[test]
    fn test_family_names() {
        assert_eq!("Kokoro".parse::<Family>().unwrap(), Family::Kokoro);
        assert!("bark".parse::<Family>().is_err());
        assert_eq!(Family::Pyannote.env_prefix(), "VOCALIS_PYANNOTE__");
    }

    #[test]
    fn test_inference_options_resolve() {
        let config = FamilyConfig {
            device: Device::Cpu,
            device_index: 1,
            compute_type: Quantization::Int8,
            cpu_threads: 4,
            ..FamilyConfig::default()
        };
        let options = config.inference_options();
        assert_eq!(options.device, Device::Cpu);
        assert_eq!(options.cpu_threads, 4);
        assert_eq!(options.compute_type, Quantization::Int8);

        let auto = FamilyConfig::default().inference_options();
        assert_ne!(auto.device, Device::Auto);
        assert!(auto.cpu_threads >= 1);
    }
}
