//! Configuration validation utilities.

use slackhive_framework::ChannelCriterion;

use super::error::{ConfigError, ConfigResult};
use super::schema::{CallbackSettings, HiveConfig, LogOutput, RetrySettings};

/// Validates the entire configuration.
pub fn validate_config(config: &HiveConfig) -> ConfigResult<()> {
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::Missing("logging.file_path"));
    }

    require_http("slack.api_url", &config.slack.api_url)?;
    positive("slack.timeout_ms", config.slack.timeout_ms)?;

    positive("stream.connect_timeout_secs", config.stream.connect_timeout_secs)?;
    positive("stream.keepalive_secs", config.stream.keepalive_secs)?;
    positive("stream.poll_interval_ms", config.stream.poll_interval_ms)?;
    validate_retry(&config.stream.retry)?;

    positive("dispatch.max_workers", config.dispatch.max_workers as u64)?;
    positive("dispatch.tick_ms", config.dispatch.tick_ms)?;

    if config.bot.name.trim().is_empty() {
        return Err(ConfigError::Missing("bot.name"));
    }

    parse_channel_criteria(&config.channels)?;

    if let Some(callback) = &config.callback {
        validate_callback(callback)?;
    }

    Ok(())
}

/// Compiles the `channels` list into subscription criteria.
pub fn parse_channel_criteria(channels: &[String]) -> ConfigResult<Vec<ChannelCriterion>> {
    channels
        .iter()
        .map(|raw| {
            if raw.trim().is_empty() {
                return Err(ConfigError::InvalidChannel {
                    criterion: raw.clone(),
                    reason: "empty".into(),
                });
            }
            ChannelCriterion::parse(raw).map_err(|e| ConfigError::InvalidChannel {
                criterion: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn positive(field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than 0"));
    }
    Ok(())
}

fn validate_retry(retry: &RetrySettings) -> ConfigResult<()> {
    positive("stream.retry.initial_delay_ms", retry.initial_delay_ms)?;
    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::invalid(
            "stream.retry.max_delay_ms",
            "must not be below initial_delay_ms",
        ));
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ConfigError::invalid(
            "stream.retry.multiplier",
            "must be a finite number of at least 1.0",
        ));
    }
    Ok(())
}

fn validate_callback(callback: &CallbackSettings) -> ConfigResult<()> {
    if !callback.path.starts_with('/') {
        return Err(ConfigError::invalid("callback.path", "must start with '/'"));
    }
    if let Some(url) = &callback.public_url {
        require_http("callback.public_url", url)?;
    }
    Ok(())
}

fn require_http(field: &'static str, url: &str) -> ConfigResult<()> {
    if url.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl {
            field,
            url: url.to_string(),
        });
    }
    Ok(())
}
