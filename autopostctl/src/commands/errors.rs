use autopost_core::{ErrorCategory, ErrorLogFilter};

use crate::{render, AppContext, AppError, ErrorCommands, OutputFormat, Result};

pub fn execute(context: &AppContext, command: &ErrorCommands, format: OutputFormat) -> Result<()> {
    match command {
        ErrorCommands::List(args) => {
            let category = args
                .category
                .as_deref()
                .map(|raw| {
                    raw.parse::<ErrorCategory>().map_err(|_| {
                        AppError::InvalidArgument(format!("unknown category: {raw}"))
                    })
                })
                .transpose()?;
            let entries = context.errors()?.list(&ErrorLogFilter {
                listing_id: args.listing_id,
                category,
                limit: Some(args.limit),
            })?;
            render(&entries, format)
        }
    }
}
