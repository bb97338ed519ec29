use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    core::dedup::Deduplicator,
    error::{AppError, Result},
    models::DEFAULT_THRESHOLD,
    store::{MemoryFingerprintStorage, PostStore},
};

/// Configuration for the application
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Maximum Hamming distance still considered a duplicate
    pub threshold: u32,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
    /// JSON snapshot of the fingerprint catalog, loaded at startup and
    /// written on shutdown
    pub catalog_path: Option<PathBuf>,
    /// Frame extraction configuration
    pub extractor: ExtractorConfig,
}

/// How to launch the external decoder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderCommand {
    /// Decoder executable
    pub program: PathBuf,
    /// Arguments placed before the decoder's own arguments, for wrappers
    /// such as `nice -n 10`
    pub pre_args: Vec<String>,
}

/// Frame extraction configuration
#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    /// Decoder invocation
    pub decoder: DecoderCommand,
    /// Width of the extracted still (height keeps the aspect ratio)
    pub frame_width: u32,
    /// Seek position before picking the representative frame
    pub seek_offset: Option<Duration>,
    /// Upper bound on one decoder run
    pub timeout: Duration,
    /// Maximum number of decoder processes running at once
    pub max_concurrent: usize,
    /// Directory for scratch files; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            threshold: DEFAULT_THRESHOLD,
            max_upload_size: 100 * 1024 * 1024, // 100MB
            catalog_path: None,
            extractor: ExtractorConfig::default(),
        }
    }
}

impl Default for DecoderCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            pre_args: Vec::new(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderCommand::default(),
            frame_width: 320,
            seek_offset: None,
            timeout: Duration::from_secs(30),
            max_concurrent: 4,
            temp_dir: None,
        }
    }
}

impl Config {
    /// Builds the configuration from `DEDUP_*` environment variables,
    /// after loading a `.env` file if one is present.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("DEDUP_BIND_ADDR") {
            config.bind_addr = parse_var("DEDUP_BIND_ADDR", &v)?;
        }
        if let Some(v) = lookup("DEDUP_THRESHOLD") {
            config.threshold = parse_var("DEDUP_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("DEDUP_MAX_UPLOAD_BYTES") {
            config.max_upload_size = parse_var("DEDUP_MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = lookup("DEDUP_CATALOG_PATH").filter(|v| !v.trim().is_empty()) {
            config.catalog_path = Some(PathBuf::from(v.trim()));
        }

        let extractor = &mut config.extractor;
        if let Some(v) = lookup("DEDUP_FFMPEG_PATH").filter(|v| !v.trim().is_empty()) {
            extractor.decoder.program = PathBuf::from(v.trim());
        }
        if let Some(v) = lookup("DEDUP_FFMPEG_PRE_ARGS") {
            extractor.decoder.pre_args = v.split_whitespace().map(String::from).collect();
        }
        if let Some(v) = lookup("DEDUP_FRAME_WIDTH") {
            extractor.frame_width = parse_var("DEDUP_FRAME_WIDTH", &v)?;
        }
        if let Some(v) = lookup("DEDUP_SEEK_OFFSET_SECS") {
            let secs: f64 = parse_var("DEDUP_SEEK_OFFSET_SECS", &v)?;
            extractor.seek_offset = Some(duration_from_secs("DEDUP_SEEK_OFFSET_SECS", secs)?);
        }
        if let Some(v) = lookup("DEDUP_EXTRACT_TIMEOUT_SECS") {
            let secs: f64 = parse_var("DEDUP_EXTRACT_TIMEOUT_SECS", &v)?;
            extractor.timeout = duration_from_secs("DEDUP_EXTRACT_TIMEOUT_SECS", secs)?;
        }
        if let Some(v) = lookup("DEDUP_MAX_CONCURRENT_EXTRACTIONS") {
            extractor.max_concurrent = parse_var("DEDUP_MAX_CONCURRENT_EXTRACTIONS", &v)?;
        }
        if let Some(v) = lookup("DEDUP_TEMP_DIR").filter(|v| !v.trim().is_empty()) {
            extractor.temp_dir = Some(PathBuf::from(v.trim()));
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.extractor.frame_width == 0 {
            return Err(AppError::Config("frame width must be positive".to_string()));
        }
        if self.extractor.max_concurrent == 0 {
            return Err(AppError::Config(
                "at least one concurrent extraction is required".to_string(),
            ));
        }
        if self.extractor.timeout.is_zero() {
            return Err(AppError::Config("extraction timeout must be positive".to_string()));
        }
        if self.threshold > 64 {
            return Err(AppError::Config(format!(
                "threshold {} exceeds the 64-bit fingerprint length",
                self.threshold
            )));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{}={:?}: {}", name, value, e)))
}

fn duration_from_secs(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| AppError::Config(format!("{}: {}", name, e)))
}

/// Application state that can be shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Duplicate-check pipeline
    pub dedup: Arc<Deduplicator>,
    /// External post store
    pub posts: Arc<dyn PostStore>,
    /// Fingerprint catalog handle, kept for snapshots
    pub catalog: Arc<MemoryFingerprintStorage>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("dedup", &self.dedup)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the pipeline from a configuration and the two store handles.
    pub fn new(
        config: Config,
        catalog: Arc<MemoryFingerprintStorage>,
        posts: Arc<dyn PostStore>,
    ) -> Arc<Self> {
        let dedup = Deduplicator::from_config(&config, catalog.clone(), posts.clone());

        Arc::new(Self {
            config,
            dedup: Arc::new(dedup),
            posts,
            catalog,
        })
    }

    /// Writes the fingerprint catalog snapshot if one is configured.
    pub async fn save_catalog(&self) -> Result<()> {
        if let Some(path) = &self.config.catalog_path {
            self.catalog.save_snapshot(path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.threshold, 5);
        assert_eq!(config.extractor.frame_width, 320);
        assert_eq!(config.extractor.timeout, Duration::from_secs(30));
        assert_eq!(config.extractor.decoder.program, PathBuf::from("ffmpeg"));
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DEDUP_BIND_ADDR", "0.0.0.0:8080"),
            ("DEDUP_THRESHOLD", "8"),
            ("DEDUP_FFMPEG_PATH", "/usr/local/bin/ffmpeg"),
            ("DEDUP_FFMPEG_PRE_ARGS", "  -nostdin  "),
            ("DEDUP_SEEK_OFFSET_SECS", "1.5"),
            ("DEDUP_EXTRACT_TIMEOUT_SECS", "2"),
            ("DEDUP_MAX_CONCURRENT_EXTRACTIONS", "2"),
            ("DEDUP_CATALOG_PATH", "catalog.json"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.threshold, 8);
        assert_eq!(config.extractor.decoder.pre_args, vec!["-nostdin".to_string()]);
        assert_eq!(config.extractor.seek_offset, Some(Duration::from_millis(1500)));
        assert_eq!(config.extractor.timeout, Duration::from_secs(2));
        assert_eq!(config.extractor.max_concurrent, 2);
        assert_eq!(config.catalog_path, Some(PathBuf::from("catalog.json")));
    }

    #[test]
    fn test_invalid_values() {
        for vars in [
            [("DEDUP_THRESHOLD", "five")],
            [("DEDUP_THRESHOLD", "65")],
            [("DEDUP_FRAME_WIDTH", "0")],
            [("DEDUP_MAX_CONCURRENT_EXTRACTIONS", "0")],
            [("DEDUP_EXTRACT_TIMEOUT_SECS", "-1")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, AppError::Config(_)), "{:?}", vars);
        }
    }
}
