use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use handoff::{ChannelCapacity, ColorSpace, DeviceSize, PresenterOptions, SizeMode, SurfaceOrigin};
use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;

/// Longest enqueue wait accepted; the producer is the browser's compositor
/// thread and must not stall for longer.
pub const MAX_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpaceSetting {
    #[default]
    Linear,
    Gamma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OriginSetting {
    #[default]
    TopLeft,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeModeSetting {
    #[default]
    RenderView,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeConfig {
    pub version: u32,
    #[serde(default)]
    pub handoff: HandoffSection,
    #[serde(default)]
    pub color: ColorSection,
    #[serde(default)]
    pub size: SizeSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandoffSection {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(
        default = "default_enqueue_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub enqueue_timeout: Duration,
    #[serde(default = "default_fences")]
    pub fences: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ColorSection {
    #[serde(default)]
    pub space: ColorSpaceSetting,
    #[serde(default)]
    pub origin: OriginSetting,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SizeSection {
    #[serde(default)]
    pub mode: SizeModeSetting,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            handoff: HandoffSection::default(),
            color: ColorSection::default(),
            size: SizeSection::default(),
        }
    }
}

impl Default for HandoffSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            enqueue_timeout: default_enqueue_timeout(),
            fences: default_fences(),
        }
    }
}

impl Default for SizeSection {
    fn default() -> Self {
        Self {
            mode: SizeModeSetting::default(),
            width: None,
            height: None,
            scale_factor: default_scale_factor(),
        }
    }
}

fn default_capacity() -> u32 {
    1
}

fn default_enqueue_timeout() -> Duration {
    handoff::DEFAULT_ENQUEUE_TIMEOUT
}

fn default_fences() -> bool {
    true
}

fn default_scale_factor() -> f32 {
    1.0
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of milliseconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v).map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v / 1000.0))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl BridgeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: BridgeConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        if ChannelCapacity::from_frames(self.handoff.capacity as usize).is_none() {
            return Err(ConfigError::Invalid(format!(
                "handoff.capacity must be 1 or 2, got {}",
                self.handoff.capacity
            )));
        }

        if self.handoff.enqueue_timeout > MAX_ENQUEUE_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "handoff.enqueue_timeout must be at most {}",
                humantime::format_duration(MAX_ENQUEUE_TIMEOUT)
            )));
        }

        let scale = self.size.scale_factor;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "size.scale_factor must be a positive number, got {scale}"
            )));
        }

        match self.size.mode {
            SizeModeSetting::Custom => match (self.size.width, self.size.height) {
                (Some(width), Some(height)) if width > 0 && height > 0 => {}
                (Some(_), Some(_)) => {
                    return Err(ConfigError::Invalid(
                        "size.width and size.height must be greater than zero".into(),
                    ));
                }
                _ => {
                    return Err(ConfigError::Invalid(
                        "size.mode = \"custom\" requires size.width and size.height".into(),
                    ));
                }
            },
            SizeModeSetting::RenderView => {
                if self.size.width.is_some() || self.size.height.is_some() {
                    return Err(ConfigError::Invalid(
                        "size.width and size.height are only valid with size.mode = \"custom\"".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn color_space(&self) -> ColorSpace {
        match self.color.space {
            ColorSpaceSetting::Linear => ColorSpace::Linear,
            ColorSpaceSetting::Gamma => ColorSpace::Gamma,
        }
    }

    pub fn origin(&self) -> SurfaceOrigin {
        match self.color.origin {
            OriginSetting::TopLeft => SurfaceOrigin::TopLeft,
            OriginSetting::BottomLeft => SurfaceOrigin::BottomLeft,
        }
    }

    pub fn size_mode(&self) -> SizeMode {
        match (self.size.mode, self.size.width, self.size.height) {
            (SizeModeSetting::Custom, Some(width), Some(height)) => {
                SizeMode::Custom(DeviceSize::new(width, height))
            }
            _ => SizeMode::RenderView,
        }
    }

    /// Presenter settings for a validated config.
    pub fn to_presenter_options(&self) -> PresenterOptions {
        PresenterOptions {
            capacity: ChannelCapacity::from_frames(self.handoff.capacity as usize).unwrap_or_default(),
            enqueue_timeout: self.handoff.enqueue_timeout,
            use_fences: self.handoff.fences,
            origin: self.origin(),
            size_mode: self.size_mode(),
            scale_factor: self.size.scale_factor,
        }
    }
}
