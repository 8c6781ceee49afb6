use super::{types::Config, ConfigError};
use crate::pipeline::{MAX_BITRATE_KBPS, MIN_BITRATE_KBPS};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.server.max_upload_mb == 0 {
        return Err(ConfigError::ValidationError(
            "server.max_upload_mb cannot be 0".to_string(),
        ));
    }

    let pipeline = &config.pipeline;
    for (name, value) in [
        ("fetch_timeout_secs", pipeline.fetch_timeout_secs),
        ("transcode_timeout_secs", pipeline.transcode_timeout_secs),
        ("separate_timeout_secs", pipeline.separate_timeout_secs),
    ] {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.{} cannot be 0",
                name
            )));
        }
    }

    if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&pipeline.bitrate_kbps) {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.bitrate_kbps must be between {} and {}",
            MIN_BITRATE_KBPS, MAX_BITRATE_KBPS
        )));
    }

    if pipeline.allowed_input_extensions.is_empty() {
        return Err(ConfigError::ValidationError(
            "pipeline.allowed_input_extensions cannot be empty".to_string(),
        ));
    }

    if pipeline.max_concurrent_jobs == Some(0) {
        return Err(ConfigError::ValidationError(
            "pipeline.max_concurrent_jobs cannot be 0".to_string(),
        ));
    }

    if pipeline.max_tracked_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_tracked_jobs cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let mut config = Config::default();
        config.pipeline.separate_timeout_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("separate_timeout_secs"));
    }

    #[test]
    fn test_validate_bitrate_out_of_range() {
        let mut config = Config::default();
        config.pipeline.bitrate_kbps = 4000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_allow_list() {
        let mut config = Config::default();
        config.pipeline.allowed_input_extensions.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_concurrency_cap() {
        let mut config = Config::default();
        config.pipeline.max_concurrent_jobs = Some(0);
        assert!(validate_config(&config).is_err());

        config.pipeline.max_concurrent_jobs = Some(3);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_tracked_jobs() {
        let mut config = Config::default();
        config.pipeline.max_tracked_jobs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_tracked_jobs"));
    }
}
