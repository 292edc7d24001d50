use std::path::PathBuf;
use std::time::Duration;

use mediabot_core::orientation::OrientationPolicy;

/// Frame count used when a request does not specify one.
pub const DEFAULT_FRAMES: u32 = 81;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected} (got '{value}')")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults matching a single-host ComfyUI install.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// ComfyUI base URL.
    pub comfyui_url: String,
    /// ComfyUI's `input/` folder; source images are staged here.
    pub input_dir: PathBuf,
    /// ComfyUI's `output/` folder; finished files are picked up from here.
    pub output_dir: PathBuf,
    pub generation_timeout: Duration,
    pub poll_interval: Duration,
    /// Scratch space for per-request directories and final files.
    pub work_dir: PathBuf,
    pub video_workflow: PathBuf,
    pub image_workflow: PathBuf,
    pub orientation: OrientationPolicy,
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var               | Default                                  |
    /// |-----------------------|------------------------------------------|
    /// | `COMFYUI_URL`         | `http://127.0.0.1:8188`                  |
    /// | `COMFYUI_INPUT_DIR`   | `/storage/comfyui/input`                 |
    /// | `COMFYUI_OUTPUT_DIR`  | `/storage/comfyui/output`                |
    /// | `GENERATION_TIMEOUT`  | `3600` (seconds)                         |
    /// | `POLL_INTERVAL_SECS`  | `3`                                      |
    /// | `WORK_DIR`            | `./work`                                 |
    /// | `VIDEO_WORKFLOW`      | `workflows/wan2.2_img_to_vid.json`       |
    /// | `IMAGE_WORKFLOW`      | `workflows/dreamshaper_txt_to_img.json`  |
    /// | `ORIENTATION_POLICY`  | `marker`                                 |
    /// | `LANDSCAPE_MARKER`    | `#landscape`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; used by `from_env` and tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let generation_timeout = parse_secs("GENERATION_TIMEOUT", &var("GENERATION_TIMEOUT", "3600"))?;
        let poll_interval = parse_secs("POLL_INTERVAL_SECS", &var("POLL_INTERVAL_SECS", "3"))?;

        let policy = var("ORIENTATION_POLICY", "marker");
        let orientation = match policy.parse::<OrientationPolicy>() {
            Ok(OrientationPolicy::MarkerToken { .. }) => OrientationPolicy::MarkerToken {
                marker: var("LANDSCAPE_MARKER", mediabot_core::orientation::DEFAULT_LANDSCAPE_MARKER),
            },
            Ok(other) => other,
            Err(_) => {
                return Err(ConfigError::Invalid {
                    var: "ORIENTATION_POLICY",
                    expected: "one of: marker, keywords",
                    value: policy,
                })
            }
        };

        Ok(Self {
            comfyui_url: var("COMFYUI_URL", "http://127.0.0.1:8188")
                .trim_end_matches('/')
                .to_string(),
            input_dir: var("COMFYUI_INPUT_DIR", "/storage/comfyui/input").into(),
            output_dir: var("COMFYUI_OUTPUT_DIR", "/storage/comfyui/output").into(),
            generation_timeout,
            poll_interval,
            work_dir: var("WORK_DIR", "./work").into(),
            video_workflow: var("VIDEO_WORKFLOW", "workflows/wan2.2_img_to_vid.json").into(),
            image_workflow: var("IMAGE_WORKFLOW", "workflows/dreamshaper_txt_to_img.json").into(),
            orientation,
        })
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            var,
            expected: "a positive number of seconds",
            value: value.to_string(),
        }),
    }
}
