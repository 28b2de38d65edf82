use super::ConfigError;
use humantime_serde::re::humantime;
use std::time::Duration;

/// Parse `5s`, `2m`, `1h 30m`, or a bare number of seconds (`90`, `0.5`)
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ConfigError::InvalidDuration {
                value: value.to_string(),
                reason: "must be a non-negative number of seconds".to_string(),
            });
        }
        return Ok(Duration::from_secs_f64(seconds));
    }

    humantime::parse_duration(trimmed).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}
