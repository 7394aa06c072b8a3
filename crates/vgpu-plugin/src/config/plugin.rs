use core::error::Error;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use serde::Deserializer;

const DEFAULT_FINGERPRINT_PERIOD: Duration = Duration::from_secs(60);

/// Errors raised while loading or validating the plugin configuration
#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Failed to read config file {}", path.display())]
    ReadFailed { path: PathBuf },
    #[display("Failed to parse config: {message}")]
    ParseFailed { message: String },
    #[display("vgpus must be set")]
    MissingVgpus,
    #[display("invalid value for vgpus {value}: must be >= 1")]
    InvalidVgpus { value: i64 },
    #[display("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl Error for ConfigError {}

/// Plugin configuration as written by the operator
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Physical GPU IDs the device source should not report
    #[serde(default)]
    pub ignored_gpu_ids: Vec<String>,

    #[serde(
        default = "default_fingerprint_period",
        deserialize_with = "deserialize_duration"
    )]
    pub fingerprint_period: Duration,

    /// Virtual devices per physical device
    #[serde(default)]
    pub vgpus: Option<i64>,

    /// Reject reservations when the last fingerprint is older than this
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub max_registry_age: Option<Duration>,
}

/// Configuration that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub enabled: bool,
    pub ignored_gpu_ids: BTreeSet<String>,
    pub fingerprint_period: Duration,
    pub vgpus: NonZeroUsize,
    pub max_registry_age: Option<Duration>,
}

fn default_enabled() -> bool {
    true
}

fn default_fingerprint_period() -> Duration {
    DEFAULT_FINGERPRINT_PERIOD
}

impl PluginConfig {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ParseFailed`] if the document is not a valid configuration
    pub fn from_yaml(yaml: &str) -> Result<Self, Report<ConfigError>> {
        serde_yaml::from_str(yaml).map_err(|e| {
            Report::new(ConfigError::ParseFailed {
                message: e.to_string(),
            })
        })
    }

    /// Read and parse a YAML config file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ReadFailed`] if the file cannot be read
    /// - [`ConfigError::ParseFailed`] if the file is not a valid configuration
    pub async fn load(path: &Path) -> Result<Self, Report<ConfigError>> {
        tracing::info!("Loading plugin configuration from {:?}", path);

        let yaml = tokio::fs::read_to_string(path)
            .await
            .change_context_lazy(|| ConfigError::ReadFailed {
                path: path.to_path_buf(),
            })?;
        Self::from_yaml(&yaml).attach_printable_lazy(|| format!("config file: {}", path.display()))
    }

    /// Check the configuration before any stream is started.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingVgpus`] if `vgpus` is absent
    /// - [`ConfigError::InvalidVgpus`] if `vgpus` is zero or negative
    /// - [`ConfigError::InvalidValue`] if `fingerprint_period` is zero or
    ///   `max_registry_age` does not exceed it
    pub fn validate(self) -> Result<ValidatedConfig, Report<ConfigError>> {
        let value = self.vgpus.ok_or_else(|| Report::new(ConfigError::MissingVgpus))?;
        let vgpus = usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| Report::new(ConfigError::InvalidVgpus { value }))?;

        if self.fingerprint_period.is_zero() {
            return Err(Report::new(ConfigError::InvalidValue {
                field: "fingerprint_period",
                message: "must be greater than zero".to_string(),
            }));
        }
        if let Some(max_age) = self.max_registry_age {
            // the source refreshes the registry once per poll at best
            if max_age <= self.fingerprint_period {
                return Err(Report::new(ConfigError::InvalidValue {
                    field: "max_registry_age",
                    message: format!(
                        "must be longer than fingerprint_period ({})",
                        format_duration(self.fingerprint_period)
                    ),
                }));
            }
        }

        Ok(ValidatedConfig {
            enabled: self.enabled,
            ignored_gpu_ids: self.ignored_gpu_ids.into_iter().collect(),
            fingerprint_period: self.fingerprint_period,
            vgpus,
            max_registry_age: self.max_registry_age,
        })
    }
}

impl std::fmt::Display for ValidatedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "enabled: {}", self.enabled)?;
        writeln!(
            f,
            "ignored_gpu_ids: [{}]",
            self.ignored_gpu_ids
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        writeln!(
            f,
            "fingerprint_period: {}",
            format_duration(self.fingerprint_period)
        )?;
        writeln!(f, "vgpus: {}", self.vgpus)?;
        match self.max_registry_age {
            Some(age) => write!(f, "max_registry_age: {}", format_duration(age)),
            None => write!(f, "max_registry_age: disabled"),
        }
    }
}

/// Parse a duration such as `500ms`, `30s`, `1m`, `1.5h` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("expected a number in duration {input:?}"));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number {number:?} in duration {input:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {input:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };
        total += value * seconds_per_unit;
        rest = tail;
    }

    Duration::try_from_secs_f64(total).map_err(|e| format!("invalid duration {input:?}: {e}"))
}

/// Render a duration the way [`parse_duration`] reads it back, e.g. `1m30s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    let (hours, rem) = (millis / 3_600_000, millis % 3_600_000);
    let (minutes, rem) = (rem / 60_000, rem % 60_000);
    let (seconds, millis) = (rem / 1000, rem % 1000);

    let mut out = String::new();
    for (value, unit) in [(hours, "h"), (minutes, "m"), (seconds, "s"), (millis, "ms")] {
        if value > 0 {
            out.push_str(&format!("{value}{unit}"));
        }
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrSeconds {
    String(String),
    Seconds(u64),
}

/// Accepts either a duration string or a plain number of seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrSeconds::deserialize(deserializer)? {
        StringOrSeconds::String(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        StringOrSeconds::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrSeconds>::deserialize(deserializer)?
        .map(|value| match value {
            StringOrSeconds::String(s) => parse_duration(&s).map_err(serde::de::Error::custom),
            StringOrSeconds::Seconds(secs) => Ok(Duration::from_secs(secs)),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use tempfile::NamedTempFile;
    use test_log::test;

    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = PluginConfig::from_yaml("vgpus: 4").unwrap().validate().unwrap();

        assert_eq!(
            config,
            ValidatedConfig {
                enabled: true,
                ignored_gpu_ids: BTreeSet::new(),
                fingerprint_period: Duration::from_secs(60),
                vgpus: NonZeroUsize::new(4).unwrap(),
                max_registry_age: None,
            }
        );
    }

    #[test]
    fn full_config_is_parsed() {
        let yaml = r#"
enabled: false
ignored_gpu_ids: ["GPU-1", "GPU-2"]
fingerprint_period: "30s"
vgpus: 8
max_registry_age: 5m
"#;
        let config = PluginConfig::from_yaml(yaml).unwrap().validate().unwrap();

        assert!(!config.enabled);
        assert_eq!(
            config.ignored_gpu_ids,
            BTreeSet::from(["GPU-1".to_string(), "GPU-2".to_string()])
        );
        assert_eq!(config.fingerprint_period, Duration::from_secs(30));
        assert_eq!(config.vgpus.get(), 8);
        assert_eq!(config.max_registry_age, Some(Duration::from_secs(300)));
    }

    #[test]
    fn missing_vgpus_is_rejected() {
        let err = PluginConfig::from_yaml("enabled: true")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::MissingVgpus));
    }

    #[test]
    fn non_positive_vgpus_are_rejected() {
        for value in [0, -1, -42] {
            let err = PluginConfig::from_yaml(&format!("vgpus: {value}"))
                .unwrap()
                .validate()
                .unwrap_err();
            assert_eq!(
                err.current_context().to_string(),
                format!("invalid value for vgpus {value}: must be >= 1")
            );
        }
    }

    #[test]
    fn zero_fingerprint_period_is_rejected() {
        let err = PluginConfig::from_yaml("vgpus: 2\nfingerprint_period: 0")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::InvalidValue { field: "fingerprint_period", .. }
        ));
    }

    #[test]
    fn registry_age_must_exceed_fingerprint_period() {
        for yaml in [
            "vgpus: 2\nfingerprint_period: 30s\nmax_registry_age: 30s",
            "vgpus: 2\nfingerprint_period: 30s\nmax_registry_age: 0",
        ] {
            let err = PluginConfig::from_yaml(yaml).unwrap().validate().unwrap_err();
            assert!(matches!(
                err.current_context(),
                ConfigError::InvalidValue { field: "max_registry_age", .. }
            ));
        }

        let config = PluginConfig::from_yaml("vgpus: 2\nfingerprint_period: 30s\nmax_registry_age: 2m")
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.max_registry_age, Some(Duration::from_secs(120)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PluginConfig::from_yaml("vgpus: 2\nvgpu: 3").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn parses_duration_strings() {
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1s500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test(tokio::test)]
    async fn loads_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"vgpus: 2\nfingerprint_period: 10s\n").unwrap();

        let config = PluginConfig::load(file.path()).await.unwrap();
        assert_eq!(config.vgpus, Some(2));
        assert_eq!(config.fingerprint_period, Duration::from_secs(10));
    }

    #[test(tokio::test)]
    async fn missing_file_reports_path() {
        let err = PluginConfig::load(Path::new("/nonexistent/vgpu.yaml"))
            .await
            .unwrap_err();
        assert_eq!(
            err.current_context().to_string(),
            "Failed to read config file /nonexistent/vgpu.yaml"
        );
    }
}
