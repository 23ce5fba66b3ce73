//! Client configuration: TOML file with environment overrides.
//!
//! Lookup order per setting: environment variable (`BLENDRELAY_*`), then the
//! config file (`~/.config/blendrelay/config.toml`), then the built-in
//! default. Out-of-range numeric settings are clamped to safe defaults and
//! never propagated as errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
const DEFAULT_NUM_IMAGES: u32 = 5;
const DEFAULT_RESOLUTION_SCALE: f64 = 1.0;
const DEFAULT_HEADLESS_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub render: RenderConfig,
    pub blender: BlenderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    /// Bearer token attached to every request when present.
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.into(),
            api_token: None,
        }
    }
}

/// Render-shaping tuple forwarded to the server when starting a run and
/// consulted locally when executing render instructions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub num_images: u32,
    pub gpu_rendering: bool,
    pub resolution_scale: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            num_images: DEFAULT_NUM_IMAGES,
            gpu_rendering: false,
            resolution_scale: DEFAULT_RESOLUTION_SCALE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlenderConfig {
    pub host: String,
    pub port: u16,
    pub headless_rendering: bool,
    #[serde(with = "humantime_serde")]
    pub headless_timeout: Duration,
    pub fallback_to_socket: bool,
    /// Explicit path to the Blender executable, overriding discovery.
    pub executable: Option<PathBuf>,
}

impl Default for BlenderConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8888,
            headless_rendering: true,
            headless_timeout: DEFAULT_HEADLESS_TIMEOUT,
            fallback_to_socket: true,
            executable: None,
        }
    }
}

impl ClientConfig {
    /// Load config from the default location, falling back to defaults when
    /// the file is missing. A malformed file is an error; a missing one is not.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                let mut cfg: ClientConfig = toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
                cfg.apply_env_overrides();
                cfg.clamp();
                Ok(cfg)
            }
            _ => {
                let mut cfg = ClientConfig::default();
                cfg.apply_env_overrides();
                cfg.clamp();
                Ok(cfg)
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("BLENDRELAY_SERVER_URL") {
            self.server.url = url;
        }
        if let Ok(tok) = std::env::var("BLENDRELAY_API_TOKEN") {
            self.server.api_token = Some(tok);
        }
        if let Ok(v) = std::env::var("BLENDRELAY_HEADLESS_RENDERING") {
            self.blender.headless_rendering = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BLENDRELAY_FALLBACK_TO_SOCKET") {
            self.blender.fallback_to_socket = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BLENDRELAY_HEADLESS_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                self.blender.headless_timeout = Duration::from_secs(secs);
            }
        }
    }

    /// Clamp numeric settings into their valid ranges. Invalid values fall
    /// back to defaults rather than failing startup.
    fn clamp(&mut self) {
        if !(1..=10).contains(&self.render.num_images) {
            warn!(
                num_images = self.render.num_images,
                "num_images out of range 1..=10, using {}", DEFAULT_NUM_IMAGES
            );
            self.render.num_images = DEFAULT_NUM_IMAGES;
        }
        if !self.render.resolution_scale.is_finite()
            || !(0.0..=1.0).contains(&self.render.resolution_scale)
        {
            warn!(
                resolution_scale = self.render.resolution_scale,
                "resolution_scale out of range 0..=1, using {}", DEFAULT_RESOLUTION_SCALE
            );
            self.render.resolution_scale = DEFAULT_RESOLUTION_SCALE;
        }
    }

    /// JSON render tuple sent with run-start requests.
    pub fn render_json(&self) -> serde_json::Value {
        serde_json::json!({
            "num_images": self.render.num_images,
            "gpu_rendering": self.render.gpu_rendering,
            "resolution_scale": self.render.resolution_scale,
        })
    }
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("blendrelay").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ClientConfig {
        let mut cfg: ClientConfig = toml::from_str(s).unwrap();
        cfg.clamp();
        cfg
    }

    #[test]
    fn defaults_when_empty() {
        let cfg = parse("");
        assert_eq!(cfg.server.url, DEFAULT_SERVER_URL);
        assert_eq!(cfg.render.num_images, 5);
        assert!(cfg.blender.headless_rendering);
        assert!(cfg.blender.fallback_to_socket);
        assert_eq!(cfg.blender.headless_timeout, Duration::from_secs(300));
    }

    #[test]
    fn num_images_clamped_to_default() {
        let cfg = parse("[render]\nnum_images = 50\n");
        assert_eq!(cfg.render.num_images, 5);
        let cfg = parse("[render]\nnum_images = 0\n");
        assert_eq!(cfg.render.num_images, 5);
        let cfg = parse("[render]\nnum_images = 10\n");
        assert_eq!(cfg.render.num_images, 10);
    }

    #[test]
    fn resolution_scale_clamped_to_default() {
        let cfg = parse("[render]\nresolution_scale = 1.5\n");
        assert_eq!(cfg.render.resolution_scale, 1.0);
        let cfg = parse("[render]\nresolution_scale = -0.1\n");
        assert_eq!(cfg.render.resolution_scale, 1.0);
        let cfg = parse("[render]\nresolution_scale = 0.5\n");
        assert_eq!(cfg.render.resolution_scale, 0.5);
    }

    #[test]
    fn humantime_timeout_parses() {
        let cfg = parse("[blender]\nheadless_timeout = \"2m\"\n");
        assert_eq!(cfg.blender.headless_timeout, Duration::from_secs(120));
    }
}
