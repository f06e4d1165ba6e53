use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::capture::command::CommandFrameSource;

use super::args::MonitorArgs;

/// Longest accepted gap between scheduled checks.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Validated monitor settings. Only produced through [MonitorConfig::try_from], so anything
/// holding one can start scheduling without further checks.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub api_key: String,
    pub interval: Duration,
    pub inactivity_threshold: f64,
    pub model: String,
    pub api_url: String,
    pub request_timeout: Duration,
    pub capture_command: String,
    pub capture_timeout: Duration,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("ANTHROPIC_API_KEY is not set. Pass --api-key or export the variable");
        }
        if self.interval.is_zero() {
            bail!("check interval must be greater than zero");
        }
        if self.interval > MAX_INTERVAL {
            bail!(
                "check interval must be at most {} minutes, got {} minutes",
                MAX_INTERVAL.as_secs() / 60,
                self.interval.as_secs() / 60
            );
        }
        if !(0.0..=1.0).contains(&self.inactivity_threshold) {
            bail!(
                "inactivity threshold must be between 0 and 1, got {}",
                self.inactivity_threshold
            );
        }
        if self.capture_command.trim().is_empty() {
            bail!("capture command must not be empty");
        }
        if self.request_timeout.is_zero() || self.capture_timeout.is_zero() {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }
}

impl TryFrom<MonitorArgs> for MonitorConfig {
    type Error = anyhow::Error;

    fn try_from(args: MonitorArgs) -> Result<Self> {
        let capture_command = match args.capture_command {
            Some(command) => command,
            None => CommandFrameSource::default_command_line()
                .map(String::from)
                .ok_or_else(|| {
                    anyhow!("no default capture command on this platform, pass --capture-command")
                })?,
        };

        let config = Self {
            api_key: args.api_key.unwrap_or_default(),
            interval: Duration::from_secs(args.interval_minutes.saturating_mul(60)),
            inactivity_threshold: args.inactivity_threshold,
            model: args.model,
            api_url: args.api_url,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            capture_command,
            capture_timeout: Duration::from_secs(args.capture_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use crate::monitor::args::MonitorArgs;

    use super::MonitorConfig;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        monitor: MonitorArgs,
    }

    fn parse(extra: &[&str]) -> MonitorArgs {
        let mut argv = vec!["acuity", "--api-key", "sk-test", "--capture-command", "cat shot.png"];
        argv.extend_from_slice(extra);
        TestCli::try_parse_from(argv).unwrap().monitor
    }

    #[test]
    fn test_explicit_arguments() {
        let config = MonitorConfig::try_from(parse(&[
            "--interval-minutes",
            "2",
            "--inactivity-threshold",
            "0.9",
            "--model",
            "some-model",
        ]))
        .unwrap();

        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.inactivity_threshold, 0.9);
        assert_eq!(config.model, "some-model");
        assert_eq!(config.capture_command, "cat shot.png");
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(MonitorConfig::try_from(parse(&["--interval-minutes", "0"])).is_err());
    }

    #[test]
    fn test_huge_interval_is_rejected() {
        assert!(MonitorConfig::try_from(parse(&["--interval-minutes", "1440"])).is_ok());
        assert!(MonitorConfig::try_from(parse(&["--interval-minutes", "1441"])).is_err());
        let max = u64::MAX.to_string();
        assert!(MonitorConfig::try_from(parse(&["--interval-minutes", max.as_str()])).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        assert!(MonitorConfig::try_from(parse(&["--inactivity-threshold", "1.5"])).is_err());
        assert!(MonitorConfig::try_from(parse(&["--inactivity-threshold=-0.1"])).is_err());
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let mut args = parse(&[]);
        args.api_key = None;
        let err = MonitorConfig::try_from(args).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_blank_capture_command_is_rejected() {
        let mut args = parse(&[]);
        args.capture_command = Some("  ".into());
        assert!(MonitorConfig::try_from(args).is_err());
    }
}
