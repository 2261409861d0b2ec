use std::path::Path;
use std::time::Duration;

use crate::error::KestrelError;

use super::types::KestrelConfig;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl KestrelConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, KestrelError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KestrelError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, KestrelError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config with an explicit thread count and defaults elsewhere.
    pub fn with_threads(count: usize) -> Self {
        let mut config = Self::default();
        config.threads.count = count;
        config
    }

    /// Target duration of one primary frame, `None` when unpaced.
    pub fn frame_budget(&self) -> Option<Duration> {
        match self.frame.target_fps {
            0 => None,
            fps => Some(Duration::from_secs_f64(1.0 / f64::from(fps))),
        }
    }

    /// Largest delta ever passed to `update`.
    pub fn max_delta(&self) -> Duration {
        Duration::from_millis(self.frame.max_delta_ms)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `KESTREL_SECTION_KEY` overrides `section.key`.
    /// Unparseable values are ignored.
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("KESTREL_THREADS_COUNT") {
            self.threads.count = v;
        }
        if let Some(v) = env_parse("KESTREL_QUEUES_CAPACITY_BLOCKS") {
            self.queues.capacity_blocks = v;
        }
        if let Some(v) = env_parse("KESTREL_TASKS_OWNED_CAPACITY") {
            self.tasks.owned_capacity = v;
        }
        if let Some(v) = env_parse("KESTREL_FRAME_TARGET_FPS") {
            self.frame.target_fps = v;
        }
        if let Some(v) = env_parse("KESTREL_FRAME_MAX_DELTA_MS") {
            self.frame.max_delta_ms = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
