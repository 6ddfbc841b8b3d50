use std::path::PathBuf;

use serde::Serialize;
use tokio::runtime::Runtime;

use crate::{render, AppContext, DisplayFallback, OutputFormat, Result, SessionCommands};

#[derive(Debug, Serialize)]
struct SavedSession {
    account_id: String,
    path: PathBuf,
    cookies: usize,
}

impl DisplayFallback for SavedSession {
    fn display(&self) -> String {
        format!(
            "session saved for {} ({} cookies) at {}",
            self.account_id,
            self.cookies,
            self.path.display()
        )
    }
}

#[derive(Debug, Serialize)]
struct InvalidatedSession {
    account_id: String,
}

impl DisplayFallback for InvalidatedSession {
    fn display(&self) -> String {
        format!("session invalidated for {}", self.account_id)
    }
}

pub fn execute(
    context: &AppContext,
    command: &SessionCommands,
    format: OutputFormat,
    runtime: &Runtime,
) -> Result<()> {
    let sessions = context.sessions();
    match command {
        SessionCommands::Save(args) => {
            let launcher = context.launcher()?;
            let record = runtime.block_on(sessions.save(&launcher, &args.account))?;
            render(
                &SavedSession {
                    path: sessions.record_path(&record.account_id),
                    cookies: record.state.cookies.len(),
                    account_id: record.account_id,
                },
                format,
            )
        }
        SessionCommands::List => render(&sessions.list()?, format),
        SessionCommands::Invalidate(args) => {
            sessions.invalidate(&args.account)?;
            render(
                &InvalidatedSession {
                    account_id: args.account.clone(),
                },
                format,
            )
        }
    }
}
