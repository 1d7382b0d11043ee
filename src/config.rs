// src/config.rs
//
// Server configuration. Every field has a flag and an environment variable.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use crate::engine::limits::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TIMEOUT_MS};
use crate::engine::{libheif_available, Limits, SearchConfig};
use crate::error::ConvertError;
use crate::server::AppState;

#[derive(Parser, Debug, Clone)]
#[command(name = "imgconv-server", version, about = "Image conversion service")]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long, env = "IMGCONV_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(long, env = "IMGCONV_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "IMGCONV_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Wall-clock budget per conversion, in milliseconds
    #[arg(long, env = "IMGCONV_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Encode attempts allowed per target-size search
    #[arg(long, env = "IMGCONV_MAX_ATTEMPTS", default_value_t = 15)]
    pub max_attempts: u32,

    /// tracing filter directives, e.g. "info,imgconv=debug"
    #[arg(long, env = "RUST_LOG", default_value = "info,tower_http=warn")]
    pub log_filter: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "IMGCONV_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,

    /// Start even when built without libheif (HEIC uploads will fail)
    #[arg(long, env = "IMGCONV_ALLOW_NO_HEIC", default_value_t = false)]
    pub allow_no_heic: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: 15,
            log_filter: "info,tower_http=warn".to_string(),
            json_logs: false,
            allow_no_heic: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn limits(&self) -> Limits {
        Limits::default()
            .with_max_upload_bytes(self.max_upload_bytes)
            .with_timeout_ms(self.timeout_ms)
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig::default().with_max_attempts(self.max_attempts)
    }

    /// Refuses a build that cannot decode HEIC unless explicitly allowed.
    pub fn check_codecs(&self) -> Result<(), ConvertError> {
        check_heic_support(libheif_available(), self.allow_no_heic)
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.limits(), self.search_config())
    }
}

fn check_heic_support(available: bool, allowed_without: bool) -> Result<(), ConvertError> {
    if available || allowed_without {
        return Ok(());
    }
    Err(ConvertError::invalid_argument(
        "features",
        "heif disabled",
        "built without libheif; rebuild with --features heif or pass --allow-no-heic",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine() {
        let config = ServerConfig::try_parse_from(["imgconv-server"]).unwrap();
        assert_eq!(config.limits(), Limits::default());
        assert_eq!(config.search_config(), SearchConfig::default());
        assert_eq!(config.bind_addr().port(), 3000);
    }

    #[test]
    fn flags_flow_into_limits() {
        let config = ServerConfig::try_parse_from([
            "imgconv-server",
            "--port",
            "8080",
            "--max-upload-bytes",
            "1024",
            "--timeout-ms",
            "500",
            "--max-attempts",
            "4",
        ])
        .unwrap();
        let limits = config.limits();
        assert_eq!(limits.max_upload_bytes, 1024);
        assert_eq!(limits.timeout_ms, 500);
        assert_eq!(config.search_config().max_attempts, 4);
        assert_eq!(config.bind_addr().port(), 8080);
    }

    #[test]
    fn missing_heic_decoder_blocks_startup() {
        assert!(check_heic_support(true, false).is_ok());
        assert!(check_heic_support(false, true).is_ok());
        let err = check_heic_support(false, false).unwrap_err();
        assert!(err.to_string().contains("--allow-no-heic"));
    }

    #[test]
    fn default_build_can_start() {
        let config = ServerConfig::try_parse_from(["imgconv-server"]).unwrap();
        assert_eq!(config.check_codecs().is_ok(), cfg!(feature = "heif"));
        let allowed =
            ServerConfig::try_parse_from(["imgconv-server", "--allow-no-heic"]).unwrap();
        assert!(allowed.check_codecs().is_ok());
    }
}
