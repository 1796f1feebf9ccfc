use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use focuslock_core::{Event, ExitDecision, SessionConfig, SessionStatus};
use serde_json::json;

use crate::host::{print_json, Host};
use crate::reminders::PendingReminder;

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a focus session
    Start {
        /// Focus phase length in minutes
        #[arg(long)]
        focus: Option<u32>,
        /// Short rest length in minutes
        #[arg(long)]
        short_rest: Option<u32>,
        /// Long rest length in minutes
        #[arg(long)]
        long_rest: Option<u32>,
        /// Focus phases between long rests
        #[arg(long)]
        cycles: Option<u32>,
    },
    /// Freeze the countdown
    Pause,
    /// Continue a paused countdown
    Resume,
    /// Abandon the session
    Cancel,
    /// End the session after at least one completed focus phase
    Complete,
    /// Print current session state as JSON
    Status,
    /// Ask to leave the focus screen
    Exit {
        /// Leave even if a countdown is running (cancels it)
        #[arg(long)]
        confirm: bool,
    },
    /// Drive the countdown in the foreground until the session ends
    Run {
        /// Seconds between ticks
        #[arg(long, default_value = "1")]
        interval: u64,
    },
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let host = Host::open()?;

    match action {
        TimerAction::Start {
            focus,
            short_rest,
            long_rest,
            cycles,
        } => {
            let defaults = host.config.session;
            let config = SessionConfig {
                focus_minutes: focus.unwrap_or(defaults.focus_minutes),
                short_rest_minutes: short_rest.unwrap_or(defaults.short_rest_minutes),
                long_rest_minutes: long_rest.unwrap_or(defaults.long_rest_minutes),
                cycles_per_long_rest: cycles.unwrap_or(defaults.cycles_per_long_rest),
            };
            host.with_session(|ctl, _| Ok(print_json(&ctl.start(Some(config))?)?))?;
        }
        TimerAction::Pause => host.with_session(|ctl, _| Ok(print_events(&ctl.pause()?)?))?,
        TimerAction::Resume => host.with_session(|ctl, _| Ok(print_events(&ctl.resume()?)?))?,
        TimerAction::Cancel => host.with_session(|ctl, _| Ok(print_events(&ctl.cancel()?)?))?,
        TimerAction::Complete => {
            host.with_session(|ctl, _| Ok(print_events(&ctl.complete()?)?))?
        }
        TimerAction::Status => host.with_session(|ctl, _| {
            let state = ctl.current_state();
            Ok(print_json(&json!({
                "state": state,
                "exit": ctl.request_exit(),
                "streak_days": ctl.displayed_streak(),
            }))?)
        })?,
        TimerAction::Exit { confirm } => host.with_session(|ctl, _| {
            match ctl.request_exit() {
                ExitDecision::Allowed => print_json(&json!({ "exit": ExitDecision::Allowed }))?,
                ExitDecision::NeedsConfirmation if confirm => {
                    print_events(&ctl.confirm_exit()?)?;
                }
                ExitDecision::NeedsConfirmation => {
                    print_json(&json!({ "exit": ExitDecision::NeedsConfirmation }))?;
                    eprintln!("a focus countdown is running; pass --confirm to abandon it");
                }
            }
            Ok(())
        })?,
        TimerAction::Run { interval } => drive(&host, Duration::from_secs(interval.max(1)))?,
    }
    Ok(())
}

fn print_events(events: &[Event]) -> Result<(), serde_json::Error> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

type Step = (Vec<Event>, Vec<PendingReminder>, SessionStatus);

/// One step of the foreground loop: catch up with whatever other
/// processes persisted, advance to now, collect due reminders.
fn step(host: &Host) -> Result<Step, Box<dyn std::error::Error>> {
    host.with_session(|ctl, recovered| {
        let now = Utc::now();
        let mut events: Vec<Event> = recovered
            .into_iter()
            .filter(|e| !matches!(e, Event::SessionRecovered { .. }))
            .collect();
        events.extend(ctl.tick(now));
        let due = host.notifier.take_due(now, host.store_timeout())?;
        Ok((events, due, ctl.status()))
    })
}

/// Tick until the session is no longer active, delivering reminders as
/// they fall due. The session is re-read from the database on every tick,
/// so a pause or cancel from another process takes effect here too.
/// Ctrl-C leaves the session persisted for the next run.
fn drive(host: &Host, interval: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut ticker = tokio::time::interval(interval);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut status = SessionStatus::Idle;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (events, due, now_status) = step(host)?;
                    status = now_status;
                    print_events(&events)?;
                    for reminder in due {
                        println!("{}", serde_json::to_string(&json!({
                            "type": "reminder",
                            "title": reminder.payload.title,
                            "body": reminder.payload.body,
                            "fire_at": reminder.fire_at,
                        }))?);
                    }
                    if !status.is_active() {
                        tracing::info!(%status, "no active session, stopping");
                        break;
                    }
                }
                _ = &mut ctrl_c => {
                    if status == SessionStatus::Running {
                        eprintln!("session left running; resume with `focuslock timer run`");
                    }
                    break;
                }
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
