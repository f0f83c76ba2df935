//! Configuration system for oxidized-psp

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub gpu: GpuConfig,
    pub paths: PathConfig,
    pub debug: DebugConfig,
}

/// General emulator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub start_paused: bool,
    /// Worker threads for parallel per-scanline work (0 = one per core)
    pub parallel_threads: u32,
}

/// GPU settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Backend selector, read once when the GPU is initialized
    pub backend: GpuBackend,
    /// Pregenerate depalettize shader sources on a background worker
    pub precompile_depal_shaders: bool,
    /// Backbuffer size used by headless contexts
    pub render_width: u32,
    pub render_height: u32,
}

/// GPU backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GpuBackend {
    Null,
    Gles,
    #[default]
    Software,
    DirectX9,
    DirectX11,
    Vulkan,
    Gx2,
}

impl GpuBackend {
    /// All backend identifiers, in selector order
    pub const ALL: [GpuBackend; 7] = [
        GpuBackend::Null,
        GpuBackend::Gles,
        GpuBackend::Software,
        GpuBackend::DirectX9,
        GpuBackend::DirectX11,
        GpuBackend::Vulkan,
        GpuBackend::Gx2,
    ];

    /// Short lowercase name, matching the config file spelling
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Gles => "gles",
            Self::Software => "software",
            Self::DirectX9 => "direct_x9",
            Self::DirectX11 => "direct_x11",
            Self::Vulkan => "vulkan",
            Self::Gx2 => "gx2",
        }
    }

    /// Parse a backend name (config spelling, case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "dx9" | "d3d9" => return Some(Self::DirectX9),
            "dx11" | "d3d11" => return Some(Self::DirectX11),
            "gl" | "opengl" => return Some(Self::Gles),
            _ => {}
        }
        Self::ALL.into_iter().find(|b| b.name() == lower)
    }

    /// Whether this backend needs a host graphics context
    pub fn requires_context(self) -> bool {
        !matches!(self, Self::Null)
    }
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub shader_dump: PathBuf,
    pub log: PathBuf,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub dump_shaders: bool,
    pub trace_gpu: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            start_paused: false,
            parallel_threads: 0,
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            backend: GpuBackend::default(),
            precompile_depal_shaders: true,
            render_width: 480,
            render_height: 272,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-psp");

        Self {
            shader_dump: base.join("dump/shaders"),
            log: base.join("oxidized-psp.log"),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            dump_shaders: false,
            trace_gpu: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location, or create it if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-psp")
            .join("config.toml")
    }
}
