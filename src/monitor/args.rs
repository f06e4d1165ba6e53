use clap::Args;

use crate::{
    classify::anthropic::{DEFAULT_API_URL, DEFAULT_MODEL},
    similarity::DEFAULT_INACTIVITY_THRESHOLD,
};

/// Monitor tunables. Each one can also be supplied through the environment.
#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(
        long = "interval-minutes",
        env = "SCREENSHOT_INTERVAL",
        default_value_t = 5,
        help = "Minutes between scheduled checks"
    )]
    pub interval_minutes: u64,
    #[arg(
        long,
        env = "INACTIVITY_THRESHOLD",
        default_value_t = DEFAULT_INACTIVITY_THRESHOLD,
        help = "Similarity above which the screen counts as unchanged"
    )]
    pub inactivity_threshold: f64,
    #[arg(long, env = "ACUITY_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,
    #[arg(long = "api-url", env = "ACUITY_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    #[arg(long = "request-timeout-secs", default_value_t = 60)]
    pub request_timeout_secs: u64,
    #[arg(
        long = "capture-command",
        env = "ACUITY_CAPTURE_COMMAND",
        help = "Command that writes a screenshot to stdout. Defaults to screencapture on macOS and ImageMagick import on Linux"
    )]
    pub capture_command: Option<String>,
    #[arg(long = "capture-timeout-secs", default_value_t = 30)]
    pub capture_timeout_secs: u64,
}
