//! Wiring shared by every command: config, database, controller.
//!
//! Several `focuslock` processes may work on the same session (a `timer run`
//! loop in one terminal, `timer pause` in another). The database is the
//! only shared state: each command rebuilds the controller from it while
//! holding the database write lock, so commands apply one at a time and
//! always start from what the previous one persisted.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use focuslock_core::{Config, CoreError, Database, Event, SessionController, SystemClock};

use crate::reminders::StoreNotifier;

pub struct Host {
    pub config: Config,
    pub db: Database,
    pub notifier: StoreNotifier,
}

impl Host {
    pub fn open() -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let db = Database::open()?;
        let notifier = StoreNotifier::new(db.clone());
        Ok(Self {
            config,
            db,
            notifier,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config.storage.timeout_ms)
    }

    /// Run `f` on a controller recovered from the database, under the
    /// database write lock. `f` also receives the recovery events.
    pub fn with_session<T, F>(&self, f: F) -> Result<T, Box<dyn Error>>
    where
        F: FnOnce(&SessionController, Vec<Event>) -> Result<T, Box<dyn Error>>,
    {
        self.db.write_locked(self.store_timeout(), || {
            let controller = self.controller()?;
            let recovered = controller.recover()?;
            f(&controller, recovered)
        })
    }

    fn controller(&self) -> Result<SessionController, CoreError> {
        let controller = SessionController::new(
            Arc::new(SystemClock),
            Box::new(self.db.clone()),
            Box::new(self.notifier.clone()),
            self.config.engine_options(),
        )?;

        let archive = self.db.clone();
        controller.subscribe(move |event| {
            if let Event::SessionArchived { summary } = event {
                if let Err(e) = archive.record_session(summary) {
                    tracing::warn!(session = %summary.session_id, error = %e, "failed to archive session");
                }
            }
        });
        Ok(controller)
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
