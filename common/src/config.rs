use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Delay between parts pushed on `/stream`.
    #[serde(default = "default_stream_interval_ms")]
    pub stream_interval_ms: u64,
    /// `/frame` always answers with a JPEG of exactly this size.
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_frame_jpeg_quality")]
    pub frame_jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Fixed warm-up wait after the device is opened.
    #[serde(default = "default_open_settle_ms")]
    pub open_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Run the local detector on every Nth captured frame.
    #[serde(default = "default_detect_every")]
    pub detect_every: u64,
    #[serde(default = "default_min_sleep_ms")]
    pub min_sleep_ms: u64,
    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,
    #[serde(default = "default_read_error_log_secs")]
    pub read_error_log_secs: u64,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_stale_join_timeout_secs")]
    pub stale_join_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Candidate model files, most capable first.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// Square input edge expected by the model.
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_vision_base_url")]
    pub base_url: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_vision_timeout_secs")]
    pub timeout_secs: u64,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_vision_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream_interval_ms: default_stream_interval_ms(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            frame_jpeg_quality: default_frame_jpeg_quality(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_frame_width(),
            height: default_frame_height(),
            fps: default_fps(),
            open_settle_ms: default_open_settle_ms(),
        }
    }
}

impl CameraConfig {
    /// Target time budget for one loop iteration.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            detect_every: default_detect_every(),
            min_sleep_ms: default_min_sleep_ms(),
            read_retry_ms: default_read_retry_ms(),
            read_error_log_secs: default_read_error_log_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            stale_join_timeout_secs: default_stale_join_timeout_secs(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            top_k: default_top_k(),
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            input_size: default_input_size(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: default_vision_base_url(),
            model: default_vision_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_vision_timeout_secs(),
            api_key_env: default_api_key_env(),
            jpeg_quality: default_vision_jpeg_quality(),
        }
    }
}

impl VisionConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredential(self.api_key_env.clone())),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("environment variable {0} is not set")]
    MissingCredential(String),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5002
}
fn default_stream_interval_ms() -> u64 {
    100
}
fn default_frame_width() -> u32 {
    640
}
fn default_frame_height() -> u32 {
    480
}
fn default_frame_jpeg_quality() -> u8 {
    80
}
fn default_fps() -> u32 {
    30
}
fn default_open_settle_ms() -> u64 {
    1000
}
fn default_detect_every() -> u64 {
    3
}
fn default_min_sleep_ms() -> u64 {
    10
}
fn default_read_retry_ms() -> u64 {
    100
}
fn default_read_error_log_secs() -> u64 {
    5
}
fn default_startup_timeout_secs() -> u64 {
    5
}
fn default_stop_timeout_secs() -> u64 {
    1
}
fn default_stale_join_timeout_secs() -> u64 {
    3
}
fn default_models() -> Vec<String> {
    vec![
        "models/yolo11m-seg.onnx".into(),
        "models/yolov8n-seg.onnx".into(),
        "models/yolov8n.onnx".into(),
    ]
}
fn default_top_k() -> usize {
    3
}
fn default_confidence_threshold() -> f32 {
    0.25
}
fn default_iou_threshold() -> f32 {
    0.45
}
fn default_input_size() -> u32 {
    640
}
fn default_vision_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_vision_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    20
}
fn default_vision_timeout_secs() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_vision_jpeg_quality() -> u8 {
    90
}
fn default_log_level() -> String {
    "info".into()
}
