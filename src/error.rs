use crate::config::ConfigError;
use crate::datasource::DataSourceError;
use crate::orchestration::JobError;
use crate::output::OutputError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data source error: {0}")]
    DataSource(#[from] DataSourceError),
    #[error("Output error: {0}")]
    Output(#[from] OutputError),
    #[error("Run failed: {0}")]
    Internal(String),
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::DataSource(err) => AppError::DataSource(err),
            JobError::Output(err) => AppError::Output(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_maps_to_matching_variant() {
        let err: AppError = JobError::DataSource(DataSourceError::Io("gone".to_string())).into();
        assert!(matches!(err, AppError::DataSource(_)));
        assert_eq!(err.to_string(), "Data source error: IO error: gone");
    }

    #[test]
    fn test_config_error_display() {
        let err: AppError = ConfigError::MissingEnv("PNL_FILLS_PATH".to_string()).into();
        assert!(err.to_string().starts_with("Configuration error: "));
    }
}
