use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AirvaultConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub upstream: UpstreamSection,
    pub stream: StreamSection,
    pub processor: ProcessorSection,
}

impl AirvaultConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    /// Raw capture files written by the relay worker.
    pub fn stream_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir).join("streams")
    }

    /// Rolling archive chunks, one subdirectory per channel.
    pub fn archive_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir).join("archive")
    }

    /// Final spliced songs/shows plus the track database.
    pub fn processed_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir).join("processed")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub output_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    /// Host of the proxy exposing the upstream radio client.
    pub host: String,
    pub port: u16,
    pub check_interval_seconds: u64,
    pub max_status_failures: u32,
}

impl UpstreamSection {
    /// The proxy binds 0.0.0.0 but must be polled over loopback.
    pub fn client_host(&self) -> &str {
        if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.host
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    pub ffmpeg_path: String,
    /// Local transport for relayed audio: "udp" or "unix".
    pub protocol: String,
    pub capture_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSection {
    /// Wipe the track database on startup.
    pub reset_tracks: bool,
}

pub fn load_airvault_config<P: AsRef<Path>>(path: P) -> Result<AirvaultConfig> {
    let config: AirvaultConfig = load_toml(&path)?;
    if config.upstream.check_interval_seconds == 0 {
        return Err(ConfigError::Invalid {
            reason: "upstream.check_interval_seconds must be at least 1".to_string(),
            path: path.as_ref().to_path_buf(),
        });
    }
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/airvault.toml");
        let config = load_airvault_config(path).expect("config should parse");
        assert_eq!(config.system.node_name, "airvault-primary");
        assert_eq!(config.upstream.client_host(), "127.0.0.1");
        assert_eq!(config.stream.protocol, "udp");
    }

    #[test]
    fn zero_check_interval_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("airvault.toml");
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/airvault.toml");
        let content = std::fs::read_to_string(fixture)
            .unwrap()
            .replace("check_interval_seconds = 30", "check_interval_seconds = 0");
        std::fs::write(&path, content).unwrap();

        let err = load_airvault_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
