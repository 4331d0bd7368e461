//! Loader for Cadence configuration with YAML + environment overlays.
//!
//! Sources are merged in the order they are added, with `CADENCE_`-prefixed
//! environment variables applied last (`CADENCE_SCHEDULE__INTERVAL_SECS=240`
//! overrides `schedule.interval_secs`). After merging, `${VAR}` placeholders in
//! string values are expanded from the process environment.
//!
//! Only the two click targets (`regions.input`, `regions.submit`) have no
//! default. They are allowed to be missing at load time so that
//! [`CadenceConfig::validate`] can report them as a pre-flight failure.
use cadence_common::observability::{LogConfig, LogFormat};
use cadence_common::{CadenceError, MAX_JITTER_RATIO, Region};
use cadence_drivers::PersonaTable;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct CadenceConfig {
    pub version: Option<String>,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub regions: RegionsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub state: StateConfig,
    /// Replaces the built-in persona parameter table when present.
    #[serde(default)]
    pub persona: Option<PersonaTable>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: f64,
    pub height: f64,
    /// Planned motion stays this many pixels away from every screen edge.
    pub edge_margin: f64,
    /// Size of the square in each corner that acts as an emergency stop.
    pub interlock_corner: f64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
            edge_margin: 10.0,
            interlock_corner: 3.0,
        }
    }
}

impl ScreenConfig {
    pub fn bounds(&self) -> Region {
        Region::screen(self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionsConfig {
    #[serde(default)]
    pub input: Option<Region>,
    #[serde(default)]
    pub submit: Option<Region>,
    /// Where idle fillers may wander. Defaults to the input region.
    #[serde(default)]
    pub idle: Option<Region>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    pub interval_floor_secs: u64,
    pub jitter_ratio: f64,
    pub tick_millis: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub idle_fillers: bool,
    pub status_every_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 180,
            interval_floor_secs: 30,
            jitter_ratio: 1.0,
            tick_millis: 1000,
            max_retries: 2,
            retry_backoff_secs: 3,
            idle_fillers: true,
            status_every_secs: 60,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn interval_floor(&self) -> Duration {
        Duration::from_secs(self.interval_floor_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn status_every(&self) -> Duration {
        Duration::from_secs(self.status_every_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub file: PathBuf,
    /// Payloads in the task file are separated by this marker.
    pub separator: String,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("prompts.txt"),
            separator: "|||".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub path: PathBuf,
    /// Key of the task set inside a shared database.
    pub set_id: String,
    pub database_url: Option<String>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Json,
            path: PathBuf::from("state/schedule.json"),
            set_id: "default".to_string(),
            database_url: None,
        }
    }
}

impl StateConfig {
    /// Explicit `database_url`, or a SQLite file derived from `path`.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}?mode=rwc", self.path.with_extension("db").display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub format: LogFormatSetting,
    pub stderr: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: LogFormatSetting::Text,
            stderr: false,
            filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self, app_name: &str) -> LogConfig {
        LogConfig {
            app_name: app_name.to_string(),
            log_dir: self.dir.clone(),
            emit_stderr: self.stderr,
            format: match self.format {
                LogFormatSetting::Text => LogFormat::Text,
                LogFormatSetting::Json => LogFormat::Json,
            },
            default_filter: self.filter.clone(),
        }
    }
}

impl CadenceConfig {
    /// Pre-flight check run before the first task is executed.
    ///
    /// ```
    /// use cadence_config::CadenceConfigLoader;
    ///
    /// let cfg = CadenceConfigLoader::new()
    ///     .with_yaml_str("regions:\n  submit: {x1: 100, y1: 100, x2: 200, y2: 140}")
    ///     .load()
    ///     .expect("loads without an input region");
    ///
    /// let err = cfg.validate().unwrap_err();
    /// assert!(err.to_string().contains("regions.input"));
    /// ```
    pub fn validate(&self) -> cadence_common::Result<()> {
        let screen = &self.screen;
        if screen.width <= 0.0 || screen.height <= 0.0 {
            return Err(CadenceError::Configuration(format!(
                "screen size {}x{} is not usable",
                screen.width, screen.height
            )));
        }
        if screen.edge_margin <= screen.interlock_corner {
            return Err(CadenceError::Configuration(format!(
                "screen.edge_margin ({}) must exceed screen.interlock_corner ({})",
                screen.edge_margin, screen.interlock_corner
            )));
        }

        let bounds = screen.bounds();
        let input = required_region("regions.input", self.regions.input)?;
        check_region("regions.input", &input, &bounds)?;
        let submit = required_region("regions.submit", self.regions.submit)?;
        check_region("regions.submit", &submit, &bounds)?;
        if let Some(idle) = &self.regions.idle {
            check_region("regions.idle", idle, &bounds)?;
        }

        if self.schedule.tick_millis == 0 {
            return Err(CadenceError::Configuration(
                "schedule.tick_millis must be positive".into(),
            ));
        }
        let jitter = self.schedule.jitter_ratio;
        if !jitter.is_finite() || jitter < 0.0 || jitter > MAX_JITTER_RATIO {
            return Err(CadenceError::Configuration(format!(
                "schedule.jitter_ratio must be within 0..={MAX_JITTER_RATIO}"
            )));
        }
        if self.tasks.separator.is_empty() {
            return Err(CadenceError::Configuration(
                "tasks.separator must not be empty".into(),
            ));
        }
        if let Some(table) = &self.persona {
            table.validate()?;
        }
        Ok(())
    }

    pub fn input_region(&self) -> cadence_common::Result<Region> {
        required_region("regions.input", self.regions.input)
    }

    pub fn submit_region(&self) -> cadence_common::Result<Region> {
        required_region("regions.submit", self.regions.submit)
    }

    /// Region idle fillers stay inside.
    pub fn idle_region(&self) -> cadence_common::Result<Region> {
        match self.regions.idle {
            Some(region) => Ok(region),
            None => self.input_region(),
        }
    }

    pub fn persona_table(&self) -> PersonaTable {
        self.persona.clone().unwrap_or_default()
    }
}

fn required_region(name: &str, region: Option<Region>) -> cadence_common::Result<Region> {
    region.ok_or_else(|| CadenceError::Configuration(format!("{name} was never captured")))
}

fn check_region(name: &str, region: &Region, bounds: &Region) -> cadence_common::Result<()> {
    if !region.is_valid() {
        return Err(CadenceError::Configuration(format!(
            "{name} is degenerate: {region:?}"
        )));
    }
    if !bounds.contains_region(region) {
        return Err(CadenceError::Configuration(format!(
            "{name} lies outside the screen: {region:?}"
        )));
    }
    Ok(())
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// `~/.config/cadence/cadence.yaml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cadence").join("cadence.yaml"))
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct CadenceConfigLoader {
    files: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for CadenceConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CadenceConfigLoader {
    /// Start with no files; `CADENCE_` env overrides are always applied on load.
    ///
    /// ```
    /// use cadence_config::CadenceConfigLoader;
    ///
    /// let config = CadenceConfigLoader::new()
    ///     .with_yaml_str("version: '1'")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.version.as_deref(), Some("1"));
    /// assert_eq!(config.schedule.interval_secs, 180);
    /// assert!(config.regions.input.is_none());
    /// ```
    pub fn new() -> Self {
        Self {
            files: Config::builder(),
        }
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files = self
            .files
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that is skipped when it does not exist, so that headless
    /// deployments can rely purely on environment variables.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files = self
            .files
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Allow tests/CLI to merge inline YAML snippets.
    ///
    /// ```
    /// use cadence_config::{CadenceConfigLoader, StateBackend};
    ///
    /// let cfg = CadenceConfigLoader::new()
    ///     .with_yaml_str(
    ///         r#"
    /// regions:
    ///   input:  { x1: 400, y1: 800, x2: 1500, y2: 900 }
    ///   submit: { x1: 1520, y1: 840, x2: 1580, y2: 880 }
    /// state:
    ///   backend: sqlite
    ///   set_id: "evening"
    /// "#,
    ///     )
    ///     .load()
    ///     .unwrap();
    ///
    /// assert!(cfg.validate().is_ok());
    /// assert_eq!(cfg.state.backend, StateBackend::Sqlite);
    /// assert_eq!(cfg.state.set_id, "evening");
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.files = self
            .files
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Consume the builder and deserialize the merged sources into strongly typed config.
    ///
    /// ```
    /// use cadence_config::CadenceConfigLoader;
    ///
    /// unsafe { std::env::set_var("CADENCE_DOC_STATE_DIR", "/srv/cadence"); }
    ///
    /// let config = CadenceConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// state:
    ///   path: "${CADENCE_DOC_STATE_DIR}/queue.json"
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.state.path.to_str(), Some("/srv/cadence/queue.json"));
    ///
    /// unsafe { std::env::remove_var("CADENCE_DOC_STATE_DIR"); }
    /// ```
    pub fn load(self) -> Result<CadenceConfig, ConfigError> {
        let cfg = self
            .files
            .add_source(
                Environment::with_prefix("CADENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> CadenceConfig {
        CadenceConfigLoader::new()
            .with_yaml_str(
                r#"
regions:
  input:  { x1: 400, y1: 800, x2: 1500, y2: 900 }
  submit: { x1: 1520, y1: 840, x2: 1580, y2: 880 }
"#,
            )
            .load()
            .unwrap()
    }

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("FOO", Some("bar"), || {
            let mut v = json!("prefix-${FOO}-suffix");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("prefix-bar-suffix"));
        });
    }

    #[test]
    fn expands_in_array_and_object() {
        temp_env::with_vars([("CITY", Some("Winston")), ("STATE", Some("NC"))], || {
            let mut v = json!(["hello-$CITY", { "loc": "${CITY}-${STATE}" }, 42, null]);
            expand_env_in_value(&mut v);
            assert_eq!(v, json!(["hello-Winston", { "loc": "Winston-NC" }, 42, null]));
        });
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}-y");
            expand_env_in_value(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.ends_with("-y"));
            assert!(s.contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${DOES_NOT_EXIST_CADENCE}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("hi-${DOES_NOT_EXIST_CADENCE}"));
    }

    #[test]
    fn missing_submit_region_fails_preflight() {
        let mut cfg = valid();
        cfg.regions.submit = None;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, CadenceError::Configuration(_)));
        assert!(err.to_string().contains("regions.submit"));
    }

    #[test]
    fn region_outside_screen_fails_preflight() {
        let mut cfg = valid();
        cfg.regions.input = Some(Region::new(1800.0, 1000.0, 2100.0, 1100.0));
        assert!(matches!(cfg.validate(), Err(CadenceError::Configuration(_))));
    }

    #[test]
    fn degenerate_region_fails_preflight() {
        let mut cfg = valid();
        cfg.regions.idle = Some(Region::new(50.0, 50.0, 50.0, 90.0));
        assert!(matches!(cfg.validate(), Err(CadenceError::Configuration(_))));
    }

    #[test]
    fn jitter_ratio_must_be_finite_and_bounded() {
        for bad in [f64::INFINITY, f64::NAN, -0.5, MAX_JITTER_RATIO + 1.0] {
            let mut cfg = valid();
            cfg.schedule.jitter_ratio = bad;
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("jitter_ratio"), "{bad}");
        }
    }

    #[test]
    fn edge_margin_must_clear_the_interlock() {
        let mut cfg = valid();
        cfg.screen.edge_margin = 2.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn idle_region_falls_back_to_input() {
        let cfg = valid();
        assert_eq!(cfg.idle_region().unwrap(), cfg.input_region().unwrap());
    }

    #[test]
    fn sqlite_url_is_derived_from_path() {
        let state = StateConfig::default();
        assert_eq!(state.database_url(), "sqlite://state/schedule.db?mode=rwc");
    }

    #[test]
    fn logging_block_maps_onto_log_config() {
        let logging = LoggingConfig {
            dir: Some(PathBuf::from("/tmp/cadence-logs")),
            format: LogFormatSetting::Json,
            stderr: true,
            filter: "cadence=debug".into(),
        };
        let lc = logging.to_log_config("cadence");
        assert_eq!(lc.format, LogFormat::Json);
        assert!(lc.emit_stderr);
        assert_eq!(lc.default_filter, "cadence=debug");
        assert_eq!(lc.log_dir.as_deref(), Some(Path::new("/tmp/cadence-logs")));
    }
}
