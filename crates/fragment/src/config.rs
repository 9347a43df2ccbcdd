use serde::Deserialize;

/// Knobs of the parallelization planner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlannerSettings {
    /// Upper bound on the copies of any one fragment.
    #[serde(default = "default_max_width")]
    pub max_width: usize,
    /// Width of fragments that have neither estimates nor data affinity.
    #[serde(default = "default_width")]
    pub default_width: usize,
    /// How far below the best-placed host an endpoint's data share may fall
    /// and still count as local. Must be at least 1.
    #[serde(default = "default_affinity_factor")]
    pub affinity_factor: f64,
    /// Estimated work one fragment copy is expected to handle.
    #[serde(default = "default_slice_target")]
    pub slice_target: f64,
    #[serde(default = "default_row_count")]
    pub default_row_count: f64,
    #[serde(default = "default_operator_cost")]
    pub default_operator_cost: f64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: i64,
}

fn default_max_width() -> usize {
    32
}

fn default_width() -> usize {
    4
}

fn default_affinity_factor() -> f64 {
    1.2
}

fn default_slice_target() -> f64 {
    100_000.0
}

fn default_row_count() -> f64 {
    1000.0
}

fn default_operator_cost() -> f64 {
    1000.0
}

fn default_prune_interval_secs() -> u64 {
    10
}

fn default_worker_timeout_secs() -> i64 {
    30
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            default_width: default_width(),
            affinity_factor: default_affinity_factor(),
            slice_target: default_slice_target(),
            default_row_count: default_row_count(),
            default_operator_cost: default_operator_cost(),
            prune_interval_secs: default_prune_interval_secs(),
            worker_timeout_secs: default_worker_timeout_secs(),
        }
    }
}

impl PlannerSettings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let config_file_path = std::env::var("IGLOO_PLANNER_CONFIG_PATH")
            .unwrap_or_else(|_| "crates/fragment/config/default.toml".to_string());

        let s = config::Config::builder()
            .add_source(config::File::with_name(&config_file_path).required(false))
            .add_source(config::Environment::with_prefix("IGLOO_PLANNER").separator("__"))
            .build()?;
        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(self.affinity_factor >= 1.0) {
            return Err(config::ConfigError::Message(format!(
                "affinity_factor must be at least 1, got {}",
                self.affinity_factor
            )));
        }
        if !(self.slice_target > 0.0) {
            return Err(config::ConfigError::Message(format!(
                "slice_target must be positive, got {}",
                self.slice_target
            )));
        }
        if self.default_row_count < 0.0 || self.default_operator_cost < 0.0 {
            return Err(config::ConfigError::Message(
                "default estimates must not be negative".to_string(),
            ));
        }
        if self.prune_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "prune_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.worker_timeout_secs < 0 {
            return Err(config::ConfigError::Message(format!(
                "worker_timeout_secs must not be negative, got {}",
                self.worker_timeout_secs
            )));
        }
        Ok(())
    }
}
