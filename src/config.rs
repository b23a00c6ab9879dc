//! Process configuration, read from command-line flags or the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};
use crate::sweeper::RetentionPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "qirust-serve", version, about = "Serve QR codes generated from text.")]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_addr: IpAddr,

    /// Directory served verbatim under `/static`.
    #[arg(long, env = "STATIC_FILES_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Subdirectory of the static root that holds generated images. Must exist.
    #[arg(long, env = "ARTIFACT_SUBDIR", default_value = "img")]
    pub artifact_subdir: String,

    /// Directory of `<lang>.json` translation files. Defaults to `<static>/lang`.
    #[arg(long, env = "LANG_DIR")]
    pub lang_dir: Option<PathBuf>,

    /// Languages to offer, comma separated. Empty offers every catalog found.
    #[arg(long, env = "LANGUAGES", value_delimiter = ',')]
    pub languages: Vec<String>,

    #[arg(long, env = "DEFAULT_LANGUAGE", default_value = "en")]
    pub default_language: String,

    /// Age in seconds after which a generated image is deleted.
    #[arg(long, env = "ARTIFACT_TTL_SECS", default_value_t = 3600)]
    pub artifact_ttl_secs: u64,

    /// Seconds between sweeps of the image directory. At most half the ttl.
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 1800)]
    pub sweep_interval_secs: u64,

    /// Largest accepted form body, in bytes.
    #[arg(long, env = "MAX_INPUT_BYTES", default_value_t = 8192)]
    pub max_input_bytes: usize,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// The artifact subdirectory without surrounding slashes.
    ///
    /// Rejects values that would put artifacts, and the sweeper, on the static
    /// root itself or outside it.
    pub fn artifact_subdir(&self) -> Result<&str> {
        let subdir = self.artifact_subdir.trim().trim_matches('/');
        let escapes = subdir
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
        if subdir.is_empty() || escapes {
            return Err(Error::InvalidArtifactSubdir(self.artifact_subdir.clone()));
        }
        Ok(subdir)
    }

    pub fn artifact_dir(&self) -> Result<PathBuf> {
        Ok(self.static_dir.join(self.artifact_subdir()?))
    }

    pub fn lang_dir(&self) -> PathBuf {
        self.lang_dir
            .clone()
            .unwrap_or_else(|| self.static_dir.join("lang"))
    }

    /// Languages with surrounding whitespace and blanks removed.
    pub fn languages(&self) -> Vec<String> {
        self.languages
            .iter()
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .collect()
    }

    pub fn retention(&self) -> Result<RetentionPolicy> {
        RetentionPolicy::new(
            Duration::from_secs(self.artifact_ttl_secs),
            Duration::from_secs(self.sweep_interval_secs),
        )
    }
}
