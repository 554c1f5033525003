use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

pub const DEFAULT_API_BASE: &str = "http://localhost:5000";

/// Tunables for one proctored session. Quotas are expressed in KiB like the
/// limits shown to the test-taker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,

    /// Deadline clock
    pub tick_interval_ms: u64,
    pub warning_window_secs: u64,
    pub warning_notice_ms: u64,
    pub auto_submit_attempts: u32,
    pub auto_submit_retry_delay_ms: u64,

    /// Frame sampler
    pub motion_threshold: f64,
    pub motion_hold_ms: u64,
    pub sample_interval_ms: u64,
    pub sample_width: u32,
    pub sample_height: u32,
    pub snapshot_jpeg_quality: u8,

    /// Answer quotas
    pub max_images_per_answer: usize,
    pub max_image_kb: u64,
    pub max_session_upload_kb: u64,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.into(),
            request_timeout_secs: 30,
            tick_interval_ms: 1_000,
            warning_window_secs: 300,
            warning_notice_ms: 10_000,
            auto_submit_attempts: 2,
            auto_submit_retry_delay_ms: 1_000,
            motion_threshold: 0.10,
            motion_hold_ms: 3_000,
            sample_interval_ms: 16,
            sample_width: 640,
            sample_height: 480,
            snapshot_jpeg_quality: 90,
            max_images_per_answer: 4,
            max_image_kb: 50,
            max_session_upload_kb: 72,
        }
    }
}

impl ProctorConfig {
    /// Reads the JSON config at `path` (defaults when the file is absent) and
    /// applies `EXAMWATCH_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(base) = std::env::var("EXAMWATCH_API_BASE") {
            if !base.trim().is_empty() {
                self.api_base_url = base.trim().to_string();
            }
        }

        let debug_mode = std::env::var("EXAMWATCH_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.warning_notice_ms = self.warning_notice_ms.min(2_000);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 || self.sample_interval_ms == 0 {
            bail!("tick and sample intervals must be greater than zero");
        }
        if !(self.motion_threshold > 0.0 && self.motion_threshold < 1.0) {
            bail!(
                "motion_threshold must be within (0, 1), got {}",
                self.motion_threshold
            );
        }
        if self.sample_width == 0 || self.sample_height == 0 {
            bail!("sample frame dimensions must be non-zero");
        }
        if self.auto_submit_attempts == 0 {
            bail!("auto_submit_attempts must be at least 1");
        }
        if self.max_image_kb > self.max_session_upload_kb {
            bail!(
                "per-image cap ({}KB) exceeds the session cap ({}KB)",
                self.max_image_kb,
                self.max_session_upload_kb
            );
        }
        if !(1..=100).contains(&self.snapshot_jpeg_quality) {
            bail!("snapshot_jpeg_quality must be within 1..=100");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn warning_notice(&self) -> Duration {
        Duration::from_millis(self.warning_notice_ms)
    }

    pub fn motion_hold(&self) -> Duration {
        Duration::from_millis(self.motion_hold_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn auto_submit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auto_submit_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_image_bytes(&self) -> u64 {
        self.max_image_kb * 1024
    }

    pub fn max_session_upload_bytes(&self) -> u64 {
        self.max_session_upload_kb * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_exam_limits() {
        let config = ProctorConfig::default();
        assert_eq!(config.max_images_per_answer, 4);
        assert_eq!(config.max_image_bytes(), 50 * 1024);
        assert_eq!(config.max_session_upload_bytes(), 72 * 1024);
        assert_eq!(config.warning_window_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proctor.json");
        fs::write(&path, r#"{ "max_image_kb": 40, "motion_threshold": 0.2 }"#).unwrap();

        let config = ProctorConfig::load(&path).unwrap();
        assert_eq!(config.max_image_kb, 40);
        assert_eq!(config.motion_threshold, 0.2);
        assert_eq!(config.max_session_upload_kb, 72);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProctorConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.tick_interval_ms, 1_000);
    }

    #[test]
    fn rejects_image_cap_above_session_cap() {
        let config = ProctorConfig {
            max_image_kb: 100,
            ..ProctorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
