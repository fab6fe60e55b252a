//! Configuration vault – reads/writes `~/.cmdgate/config.toml`.
//!
//! Every field has a serde default, so a partial file (or none at all) yields
//! a runnable gate.  Limit sets use one shared `reference_speed_points` list
//! plus one value list per limit:
//!
//! ```toml
//! [nominal]
//! vel_lim = 25.0
//! reference_speed_points = [0.1, 0.3, 20.0, 30.0]
//! steer_lim = [1.0, 1.0, 1.0, 0.8]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use cmdgate_kernel::{FilterParams, GateSettings, InputSpec, LimitTable, TimeoutParams};
use cmdgate_types::{GateError, SourceId};

/// Environment variable that replaces the default config location.
pub const CONFIG_PATH_ENV: &str = "CMDGATE_CONFIG";

/// One external command input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub id: u16,
    pub name: String,
}

/// One limit set as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub vel_lim: f64,
    pub reference_speed_points: Vec<f64>,
    pub steer_lim: Vec<f64>,
    pub steer_rate_lim: Vec<f64>,
    pub lon_acc_lim: Vec<f64>,
    pub lon_jerk_lim: Vec<f64>,
    pub lat_acc_lim: Vec<f64>,
    pub lat_jerk_lim: Vec<f64>,
    pub actual_steer_diff_lim: Vec<f64>,
}

impl LimitConfig {
    fn nominal() -> Self {
        Self {
            vel_lim: 25.0,
            reference_speed_points: vec![0.1, 0.3, 20.0, 30.0],
            steer_lim: vec![1.0, 1.0, 1.0, 0.8],
            steer_rate_lim: vec![1.0, 1.0, 1.0, 0.8],
            lon_acc_lim: vec![5.0, 5.0, 5.0, 4.0],
            lon_jerk_lim: vec![80.0, 5.0, 5.0, 4.0],
            lat_acc_lim: vec![5.0, 5.0, 5.0, 4.0],
            lat_jerk_lim: vec![7.0, 7.0, 7.0, 6.0],
            actual_steer_diff_lim: vec![1.0, 1.0, 1.0, 0.8],
        }
    }

    fn transition() -> Self {
        Self {
            vel_lim: 50.0,
            reference_speed_points: vec![20.0, 30.0],
            steer_lim: vec![1.0, 0.8],
            steer_rate_lim: vec![1.0, 0.8],
            lon_acc_lim: vec![1.0, 0.9],
            lon_jerk_lim: vec![0.5, 0.4],
            lat_acc_lim: vec![2.0, 1.8],
            lat_jerk_lim: vec![7.0, 6.0],
            actual_steer_diff_lim: vec![1.0, 0.8],
        }
    }

    /// Turn the columns into [`FilterParams`]; `section` prefixes errors.
    pub fn to_params(&self, section: &str, wheel_base: f64) -> Result<FilterParams, GateError> {
        let table = |name: &str, values: &[f64]| {
            LimitTable::from_columns(&self.reference_speed_points, values).map_err(|e| match e {
                GateError::Config(m) => GateError::Config(format!("{section}.{name}: {m}")),
                other => other,
            })
        };
        let params = FilterParams {
            vel_lim: self.vel_lim,
            steer_lim: table("steer_lim", &self.steer_lim)?,
            steer_rate_lim: table("steer_rate_lim", &self.steer_rate_lim)?,
            lon_acc_lim: table("lon_acc_lim", &self.lon_acc_lim)?,
            lon_jerk_lim: table("lon_jerk_lim", &self.lon_jerk_lim)?,
            lat_acc_lim: table("lat_acc_lim", &self.lat_acc_lim)?,
            lat_jerk_lim: table("lat_jerk_lim", &self.lat_jerk_lim)?,
            actual_steer_diff_lim: table("actual_steer_diff_lim", &self.actual_steer_diff_lim)?,
            wheel_base,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Persisted gate configuration stored in `~/.cmdgate/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Cycle rate [Hz].
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Vehicle wheel base [m].
    #[serde(default = "default_wheel_base")]
    pub wheel_base: f64,

    /// Seconds without data before an entity is reported WARN.
    #[serde(default = "default_diag_warn")]
    pub diag_timeout_warn_duration: f64,

    /// Seconds without data before an entity is reported STALE.
    #[serde(default = "default_diag_error")]
    pub diag_timeout_error_duration: f64,

    /// Deceleration commanded by the built-in source [m/s²].
    #[serde(default = "default_emergency_acceleration")]
    pub emergency_acceleration: f64,

    /// Acceleration held while the vehicle is stopped [m/s²].
    #[serde(default = "default_stop_hold_acceleration")]
    pub stop_hold_acceleration: f64,

    /// Speed below which the vehicle counts as stopped [m/s].
    #[serde(default = "default_stop_check_speed")]
    pub stop_check_speed: f64,

    #[serde(default = "default_inputs")]
    pub inputs: Vec<InputConfig>,

    #[serde(default = "LimitConfig::nominal")]
    pub nominal: LimitConfig,

    #[serde(default = "LimitConfig::transition")]
    pub transition: LimitConfig,
}

fn default_rate() -> f64 {
    10.0
}
fn default_wheel_base() -> f64 {
    2.79
}
fn default_diag_warn() -> f64 {
    1.0
}
fn default_diag_error() -> f64 {
    2.0
}
fn default_emergency_acceleration() -> f64 {
    -1.5
}
fn default_stop_hold_acceleration() -> f64 {
    -1.5
}
fn default_stop_check_speed() -> f64 {
    0.01
}
fn default_inputs() -> Vec<InputConfig> {
    vec![
        InputConfig {
            id: 1,
            name: "planner".to_string(),
        },
        InputConfig {
            id: 2,
            name: "operator".to_string(),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            wheel_base: default_wheel_base(),
            diag_timeout_warn_duration: default_diag_warn(),
            diag_timeout_error_duration: default_diag_error(),
            emergency_acceleration: default_emergency_acceleration(),
            stop_hold_acceleration: default_stop_hold_acceleration(),
            stop_check_speed: default_stop_check_speed(),
            inputs: default_inputs(),
            nominal: LimitConfig::nominal(),
            transition: LimitConfig::transition(),
        }
    }
}

impl Config {
    /// The cycle period derived from `rate`.
    pub fn period(&self) -> Result<Duration, GateError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(GateError::Config(format!(
                "rate must be a positive frequency, got {}",
                self.rate
            )));
        }
        Duration::try_from_secs_f64(1.0 / self.rate)
            .map_err(|e| GateError::Config(format!("invalid rate {}: {e}", self.rate)))
    }

    /// Validate the file contents and build the controller settings.
    pub fn to_settings(&self) -> Result<GateSettings, GateError> {
        let nominal = self.nominal.to_params("nominal", self.wheel_base)?;
        let transition = self.transition.to_params("transition", self.wheel_base)?;
        let mut settings = GateSettings::new(nominal, transition);
        settings.inputs = self
            .inputs
            .iter()
            .map(|input| InputSpec::new(SourceId(input.id), input.name.clone()))
            .collect();
        settings.timeout = TimeoutParams::from_secs_f64(
            self.diag_timeout_warn_duration,
            self.diag_timeout_error_duration,
        )?;
        settings.emergency_acceleration = self.emergency_acceleration;
        settings.stop_hold_acceleration = self.stop_hold_acceleration;
        settings.stop_check_speed = self.stop_check_speed;
        settings.validate()?;
        Ok(settings)
    }
}

/// `$CMDGATE_CONFIG`, or `~/.cmdgate/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cmdgate").join("config.toml")
}

/// Where the starting configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Read from the config file.
    File,
    /// No file existed; the defaults were used and written out.
    Defaults,
}

/// Resolve the configuration to start with, environment overrides applied.
///
/// A missing file yields the defaults, which are written to the config path
/// for the operator to edit.  An unreadable or malformed file is an error.
pub fn load_or_init() -> Result<(Config, Origin), String> {
    let (mut cfg, origin) = load_or_init_at(&config_path())?;
    apply_env_overrides(&mut cfg);
    Ok((cfg, origin))
}

pub(crate) fn load_or_init_at(path: &Path) -> Result<(Config, Origin), String> {
    if let Some(cfg) = load_from(path)? {
        return Ok((cfg, Origin::File));
    }
    let cfg = Config::default();
    if let Err(e) = save_to(&cfg, path) {
        warn!(path = %path.display(), error = %e, "could not write default config");
    }
    Ok((cfg, Origin::Defaults))
}

/// Load the file at `path` as written, without overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `CMDGATE_*` environment overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CMDGATE_RATE` | `rate` |
/// | `CMDGATE_WHEEL_BASE` | `wheel_base` |
/// | `CMDGATE_DIAG_WARN` | `diag_timeout_warn_duration` |
/// | `CMDGATE_DIAG_ERROR` | `diag_timeout_error_duration` |
///
/// Values that do not parse as numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<f64>().ok());
    if let Some(v) = number("CMDGATE_RATE") {
        cfg.rate = v;
    }
    if let Some(v) = number("CMDGATE_WHEEL_BASE") {
        cfg.wheel_base = v;
    }
    if let Some(v) = number("CMDGATE_DIAG_WARN") {
        cfg.diag_timeout_warn_duration = v;
    }
    if let Some(v) = number("CMDGATE_DIAG_ERROR") {
        cfg.diag_timeout_error_duration = v;
    }
}

/// Save the config to `path`, creating the directory if necessary.  On Unix
/// the directory is `0o700` and the file `0o600`.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_build_valid_settings() {
        let cfg = Config::default();
        let settings = cfg.to_settings().expect("defaults must validate");
        assert_eq!(settings.inputs.len(), 2);
        assert_eq!(settings.nominal.wheel_base, 2.79);
        assert!((settings.nominal.steer_lim.at(25.0) - 0.9).abs() < 1e-9);
        assert_eq!(cfg.period().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            rate = 30.0

            [[inputs]]
            id = 5
            name = "remote"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.rate, 30.0);
        assert_eq!(cfg.wheel_base, default_wheel_base());
        assert_eq!(
            cfg.inputs,
            vec![InputConfig {
                id: 5,
                name: "remote".to_string()
            }]
        );
        assert_eq!(cfg.transition, LimitConfig::transition());
    }

    #[test]
    fn reserved_input_ids_are_rejected() {
        for id in [0, u16::MAX] {
            let mut cfg = Config::default();
            cfg.inputs.push(InputConfig {
                id,
                name: "intruder".to_string(),
            });
            let err = cfg.to_settings().unwrap_err();
            assert!(matches!(err, GateError::Config(_)));
        }
    }

    #[test]
    fn mismatched_table_lengths_name_the_field() {
        let mut cfg = Config::default();
        cfg.transition.lat_acc_lim = vec![2.0];
        match cfg.to_settings() {
            Err(GateError::Config(message)) => {
                assert!(message.starts_with("transition.lat_acc_lim"), "{message}");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_scalars_are_rejected() {
        let cfg = Config {
            rate: 0.0,
            ..Config::default()
        };
        assert!(cfg.period().is_err());

        let cfg = Config {
            wheel_base: 0.0,
            ..Config::default()
        };
        assert!(cfg.to_settings().is_err());

        let cfg = Config {
            diag_timeout_warn_duration: 3.0,
            diag_timeout_error_duration: 1.0,
            ..Config::default()
        };
        assert!(cfg.to_settings().is_err());
    }

    #[test]
    fn env_overrides_replace_numeric_fields() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            overrides(&[
                ("CMDGATE_RATE", "50"),
                ("CMDGATE_WHEEL_BASE", " 3.1 "),
                ("CMDGATE_DIAG_WARN", "0.5"),
                ("CMDGATE_DIAG_ERROR", "1.5"),
            ]),
        );
        assert_eq!(cfg.rate, 50.0);
        assert_eq!(cfg.wheel_base, 3.1);
        assert_eq!(cfg.diag_timeout_warn_duration, 0.5);
        assert_eq!(cfg.diag_timeout_error_duration, 1.5);
    }

    #[test]
    fn env_overrides_ignore_unparseable_values() {
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, overrides(&[("CMDGATE_RATE", "fast")]));
        assert_eq!(cfg.rate, default_rate());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "rate = \"fast\"").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn missing_file_starts_from_written_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let (cfg, origin) = load_or_init_at(&path).expect("defaults");
        assert_eq!(origin, Origin::Defaults);
        assert_eq!(cfg, Config::default());
        assert!(path.exists());

        let (again, origin) = load_or_init_at(&path).expect("reload");
        assert_eq!(origin, Origin::File);
        assert_eq!(again, cfg);
    }

    #[test]
    fn malformed_file_is_an_error_not_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        for raw in [
            "[nominal]\nsteer_lim = \"wide\"\n",
            "[[inputs]]\nid = 70000\nname = \"planner\"\n",
            "rate = ",
        ] {
            fs::write(&path, raw).unwrap();
            assert!(load_or_init_at(&path).is_err(), "{raw}");
        }
    }

    #[test]
    fn config_path_points_to_cmdgate_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.cmdgate/config.toml"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }
}
