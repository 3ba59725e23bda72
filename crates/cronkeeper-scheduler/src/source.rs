use cronkeeper_core::JobConfig;

use crate::{error::Result, types::JobDefinition};

/// Owner of the job definitions. Read-only from the scheduler's side.
pub trait JobSource: Send + Sync {
    fn jobs(&self) -> Result<Vec<JobDefinition>>;

    /// Only definitions with the active flag set.
    fn active_jobs(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.jobs()?.into_iter().filter(|j| j.active).collect())
    }
}

/// Fixed list of definitions, usually the `[[jobs]]` table of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticJobSource {
    jobs: Vec<JobDefinition>,
}

impl StaticJobSource {
    pub fn new(jobs: Vec<JobDefinition>) -> Self {
        Self { jobs }
    }

    pub fn from_config(jobs: &[JobConfig]) -> Self {
        Self::new(jobs.iter().map(JobDefinition::from).collect())
    }

    pub fn get(&self, job_code: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.job_code == job_code)
    }
}

impl JobSource for StaticJobSource {
    fn jobs(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.jobs.clone())
    }
}
