use tokio::runtime::Runtime;

use autopost_core::{generate_job_id, CancelFlag, JobStatus, ListingSelection, RunRequest};

use crate::{render, AppContext, AppError, OutputFormat, Result, RunArgs};

/// Runs a posting batch in the foreground and reports the job outcome
/// through the exit status: failures in any listing make the command fail.
pub fn execute(
    context: &AppContext,
    args: &RunArgs,
    format: OutputFormat,
    runtime: &Runtime,
) -> Result<()> {
    let orchestrator = context.orchestrator()?;
    let selection = if args.listing_ids.is_empty() {
        ListingSelection::Due
    } else {
        ListingSelection::Ids(args.listing_ids.clone())
    };
    let job_id = args.job_id.clone().unwrap_or_else(generate_job_id);
    let request = RunRequest {
        job_id: job_id.clone(),
        selection,
        include_failed: args.include_failed,
    };

    let snapshot = runtime.block_on(orchestrator.run(&request, &CancelFlag::new()))?;
    render(&snapshot, format)?;

    if snapshot.status == JobStatus::Failed {
        return Err(AppError::JobFailed {
            job_id,
            summary: snapshot
                .error_message
                .unwrap_or_else(|| "failures recorded".to_string()),
        });
    }
    Ok(())
}
