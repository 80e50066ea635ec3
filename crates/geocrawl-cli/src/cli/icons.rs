//! Console icons and styled labels shared by the commands.

use console::{style, StyledObject};

use geocrawl::models::{Health, RunStatus, ScraperState};

/// Success checkmark icon (green ✓).
pub fn success() -> StyledObject<&'static str> {
    style("✓").green()
}

/// Info/progress arrow icon (cyan →).
pub fn info() -> StyledObject<&'static str> {
    style("→").cyan()
}

/// Warning icon (yellow !).
pub fn warn() -> StyledObject<&'static str> {
    style("!").yellow()
}

/// Error icon (red ✗).
pub fn error() -> StyledObject<&'static str> {
    style("✗").red()
}

pub fn health(health: Health) -> StyledObject<&'static str> {
    let label = style(health.as_str());
    match health {
        Health::Healthy => label.green(),
        Health::Degraded => label.cyan(),
        Health::Warning => label.yellow(),
        Health::Critical => label.red().bold(),
    }
}

pub fn state(state: ScraperState) -> StyledObject<&'static str> {
    let label = style(state.as_str());
    match state {
        ScraperState::Running => label.green(),
        ScraperState::Paused => label.yellow(),
        ScraperState::Failed => label.red(),
        _ => label.dim(),
    }
}

pub fn run_status(status: RunStatus) -> StyledObject<&'static str> {
    let label = style(status.as_str());
    match status {
        RunStatus::Running => label.green(),
        RunStatus::Paused => label.yellow(),
        RunStatus::Failed => label.red(),
        RunStatus::Completed => label.cyan(),
        _ => label.dim(),
    }
}
