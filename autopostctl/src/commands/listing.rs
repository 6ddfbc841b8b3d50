use chrono::{DateTime, Utc};
use serde::Serialize;

use autopost_core::{ListingFilter, ListingStatus, NewListing};

use crate::{render, AppContext, AppError, DisplayFallback, ListingCommands, OutputFormat, Result};

#[derive(Debug, Serialize)]
struct SubmittedListing {
    id: i64,
    scheduled_at: DateTime<Utc>,
}

impl DisplayFallback for SubmittedListing {
    fn display(&self) -> String {
        format!(
            "listing #{} queued for {}",
            self.id,
            self.scheduled_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

#[derive(Debug, Serialize)]
struct RetriedListing {
    id: i64,
    retry_count: i64,
}

impl DisplayFallback for RetriedListing {
    fn display(&self) -> String {
        format!(
            "listing #{} reset to pending (attempts so far: {})",
            self.id, self.retry_count
        )
    }
}

pub fn execute(context: &AppContext, command: &ListingCommands, format: OutputFormat) -> Result<()> {
    let store = context.listings()?;
    match command {
        ListingCommands::List(args) => {
            let status = args
                .status
                .as_deref()
                .map(|raw| {
                    raw.parse::<ListingStatus>()
                        .map_err(|_| AppError::InvalidArgument(format!("unknown status: {raw}")))
                })
                .transpose()?;
            let listings = store.list(&ListingFilter {
                status,
                account_id: args.account.clone(),
                limit: Some(args.limit),
            })?;
            render(&listings, format)
        }
        ListingCommands::Add(args) => {
            let scheduled_at = match &args.scheduled_at {
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map_err(|err| {
                        AppError::InvalidArgument(format!("scheduled_at must be RFC 3339: {err}"))
                    })?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let id = store.submit(&NewListing {
                account_id: args.account.clone(),
                title: args.title.clone(),
                description: args.description.clone(),
                price: args.price,
                image_path: args.image.clone(),
                scheduled_at,
            })?;
            render(&SubmittedListing { id, scheduled_at }, format)
        }
        ListingCommands::Retry(args) => {
            store.retry(args.id)?;
            let listing = store.get(args.id)?;
            render(
                &RetriedListing {
                    id: listing.id,
                    retry_count: listing.retry_count,
                },
                format,
            )
        }
    }
}
