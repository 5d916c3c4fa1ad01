//! Worker configuration (spec §6), read from the process environment —
//! loading from a config file or flags is out of scope (spec §1).

use conveyor_core::ConveyorError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_name: String,
    pub repo_root: String,
    pub server_base_url: String,
    pub shared_key: String,
    pub max_job_retries: u32,
    pub dependency_wait_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConveyorError> {
        let worker_name = std::env::var("CONVEYOR_WORKER_NAME")
            .map_err(|_| ConveyorError::ConfigInvalid("CONVEYOR_WORKER_NAME is not set".into()))?;
        let repo_root =
            std::env::var("CONVEYOR_REPO_ROOT").unwrap_or_else(|_| "/cvmfs".to_string());
        let server_base_url = std::env::var("CONVEYOR_SERVER_URL")
            .map_err(|_| ConveyorError::ConfigInvalid("CONVEYOR_SERVER_URL is not set".into()))?;
        let shared_key = std::env::var("CONVEYOR_SHARED_KEY")
            .map_err(|_| ConveyorError::ConfigInvalid("CONVEYOR_SHARED_KEY is not set".into()))?;
        let max_job_retries = std::env::var("CONVEYOR_MAX_JOB_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);
        let dependency_wait_timeout_secs = std::env::var("CONVEYOR_DEPENDENCY_WAIT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        Ok(Self {
            worker_name,
            repo_root,
            server_base_url,
            shared_key,
            max_job_retries,
            dependency_wait_timeout_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_worker_name_is_rejected() {
        std::env::remove_var("CONVEYOR_WORKER_NAME");
        assert!(WorkerConfig::from_env().is_err());
    }
}
