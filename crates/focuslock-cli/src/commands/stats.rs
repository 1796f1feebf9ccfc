use chrono::Local;
use clap::Subcommand;
use serde_json::json;

use crate::host::{print_json, Host};

#[derive(Subcommand)]
pub enum StatsAction {
    /// Current and longest streak with lifetime focus totals
    Streak,
    /// Archived sessions: today, this month, all-time and averages
    Sessions,
    /// Both of the above
    All,
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let host = Host::open()?;

    let report = host.with_session(|ctl, _| {
        let streak = json!({
            "displayed_streak_days": ctl.displayed_streak(),
            "record": ctl.streak(),
            "pending_write": ctl.has_pending_streak_write(),
        });
        // Local calendar days, as the streak counts them.
        let sessions = serde_json::to_value(host.db.stats(Local::now())?)?;
        Ok(match action {
            StatsAction::Streak => streak,
            StatsAction::Sessions => sessions,
            StatsAction::All => json!({ "streak": streak, "sessions": sessions }),
        })
    })?;
    print_json(&report)?;
    Ok(())
}
