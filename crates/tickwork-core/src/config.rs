use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POOL_NAME: &str = "jobs";
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Top-level config (tickwork.toml + TICKWORK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickworkConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Values substituted for `${name}` in schedule literals.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Jobs declared in the config file (used by the `tickwork` binary).
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Worker pool and registration policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads are named `<pool_name>-thread-<n>`.
    #[serde(default = "default_pool_name")]
    pub pool_name: String,
    /// Number of worker threads, and the number of jobs that may run at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum number of pending submissions before new ones are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub dual_registration: DualRegistration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_name: default_pool_name(),
            pool_size: default_pool_size(),
            queue_capacity: default_queue_capacity(),
            dual_registration: DualRegistration::default(),
        }
    }
}

/// What to do when one task is registered both with a fixed delay and a
/// calendar expression.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DualRegistration {
    /// Refuse the second registration.
    #[default]
    Forbid,
    /// Arm both; the two schedules share the task's telemetry.
    Allow,
}

/// A job declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Fixed delay literal, e.g. "30s" or "${every.poll}".
    pub every: Option<String>,
    /// Calendar expression, e.g. "0 */5 * * * ?".
    pub on: Option<String>,
    /// Message logged on each run.
    #[serde(default)]
    pub message: String,
}

fn default_pool_name() -> String {
    DEFAULT_POOL_NAME.to_string()
}
fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl TickworkConfig {
    /// Load config from a TOML file with TICKWORK_* env var overrides.
    ///
    /// Nested keys use a double underscore:
    /// `TICKWORK_SCHEDULER__POOL_SIZE=4` sets `scheduler.pool_size`.
    /// A missing file is not an error; defaults fill the gaps.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TickworkConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TICKWORK_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        use crate::error::CoreError;

        if self.scheduler.pool_size == 0 {
            return Err(CoreError::Config("scheduler.pool_size must be at least 1".into()));
        }
        if self.scheduler.queue_capacity == 0 {
            return Err(CoreError::Config(
                "scheduler.queue_capacity must be at least 1".into(),
            ));
        }
        if self.scheduler.pool_name.trim().is_empty() {
            return Err(CoreError::Config("scheduler.pool_name must not be empty".into()));
        }
        for job in &self.jobs {
            if job.every.is_some() == job.on.is_some() {
                return Err(CoreError::Config(format!(
                    "job '{}' needs exactly one of `every` or `on`",
                    job.name
                )));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_is_missing() {
        figment::Jail::expect_with(|_jail| {
            let config = TickworkConfig::load(Some("does-not-exist.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.pool_name, "jobs");
            assert_eq!(config.scheduler.pool_size, 10);
            assert_eq!(config.scheduler.queue_capacity, 1000);
            assert_eq!(config.scheduler.dual_registration, DualRegistration::Forbid);
            assert!(config.jobs.is_empty());
            Ok(())
        });
    }

    #[test]
    fn file_and_env_are_merged() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "tickwork.toml",
                r#"
                [scheduler]
                pool_size = 2
                dual_registration = "allow"

                [variables]
                "cron.tick" = "*/1 * * * * ?"

                [[jobs]]
                name = "tick"
                on = "${cron.tick}"
                message = "tick"
                "#,
            )?;
            jail.set_env("TICKWORK_SCHEDULER__QUEUE_CAPACITY", "8");

            let config = TickworkConfig::load(Some("tickwork.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.pool_size, 2);
            assert_eq!(config.scheduler.queue_capacity, 8);
            assert_eq!(config.scheduler.dual_registration, DualRegistration::Allow);
            assert_eq!(config.variables["cron.tick"], "*/1 * * * * ?");
            assert_eq!(config.jobs[0].on.as_deref(), Some("${cron.tick}"));
            Ok(())
        });
    }

    #[test]
    fn job_needs_exactly_one_schedule() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "tickwork.toml",
                r#"
                [[jobs]]
                name = "both"
                every = "1s"
                on = "* * * * * ?"
                "#,
            )?;
            let err = TickworkConfig::load(Some("tickwork.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            Ok(())
        });
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TICKWORK_SCHEDULER__POOL_SIZE", "0");
            assert!(TickworkConfig::load(Some("missing.toml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("tickwork.toml", "[scheduler]\nqueue_capacity = 0\n")?;
            let err = TickworkConfig::load(Some("tickwork.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            assert!(err.to_string().contains("queue_capacity"));
            Ok(())
        });
    }
}
