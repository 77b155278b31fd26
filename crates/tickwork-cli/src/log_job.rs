use tickwork_core::JobConfig;
use tickwork_scheduler::{async_trait, Job};
use tracing::info;

/// Job declared in the config file: logs its message on every run.
pub struct LogJob {
    name: String,
    message: String,
}

impl LogJob {
    pub fn from_config(job: &JobConfig) -> Self {
        let message = if job.message.is_empty() {
            format!("{} ran", job.name)
        } else {
            job.message.clone()
        };
        Self {
            name: job.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl Job for LogJob {
    type Output = ();

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn do_job(&self) -> anyhow::Result<()> {
        info!(job = %self.name, "{}", self.message);
        Ok(())
    }
}
