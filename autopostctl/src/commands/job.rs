use tokio::runtime::Runtime;
use tokio_stream::StreamExt;

use autopost_core::{CloseReason, StatusEvent};

use crate::{render, AppContext, DisplayFallback, JobCommands, OutputFormat, Result};

pub fn execute(
    context: &AppContext,
    command: &JobCommands,
    format: OutputFormat,
    runtime: &Runtime,
) -> Result<()> {
    let reporter = context.reporter()?;
    match command {
        JobCommands::Status(args) => {
            let snapshot = reporter.snapshot(&args.job_id)?;
            render(&snapshot, format)
        }
        JobCommands::Recent(args) => {
            let jobs = context.jobs()?.list_recent(args.limit)?;
            render(&jobs, format)
        }
        JobCommands::Watch(args) => runtime.block_on(async {
            let mut stream = reporter.subscribe(&args.job_id);
            while let Some(event) = stream.next().await {
                match (&event, format) {
                    (_, OutputFormat::Json) => {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    (StatusEvent::Snapshot(snapshot), OutputFormat::Text) => {
                        println!("{}", snapshot.display());
                    }
                    (StatusEvent::Closed { reason }, OutputFormat::Text) => {
                        println!("stream closed ({})", close_reason_label(*reason));
                    }
                }
            }
            Ok(())
        }),
    }
}

fn close_reason_label(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Finished => "job finished",
        CloseReason::Timeout => "maximum watch duration reached",
        CloseReason::NotFound => "job not found",
    }
}
