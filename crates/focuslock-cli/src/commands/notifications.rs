use chrono::Utc;
use clap::Subcommand;

use crate::host::{print_json, Host};

#[derive(Subcommand)]
pub enum NotificationsAction {
    /// List reminders waiting to fire
    List,
    /// Print and clear reminders that are already due
    Due,
}

pub fn run(action: NotificationsAction) -> Result<(), Box<dyn std::error::Error>> {
    let host = Host::open()?;
    let timeout = host.store_timeout();
    match action {
        NotificationsAction::List => print_json(&host.notifier.pending(timeout)?)?,
        NotificationsAction::Due => {
            let due = host
                .db
                .write_locked(timeout, || host.notifier.take_due(Utc::now(), timeout))?;
            print_json(&due)?;
        }
    }
    Ok(())
}
