pub mod errors;
pub mod job;
pub mod listing;
pub mod run;
pub mod session;

use clap::CommandFactory;

use crate::{Cli, CompletionsArgs};

pub fn completions(args: &CompletionsArgs) {
    let mut command = Cli::command();
    clap_complete::generate(
        args.shell,
        &mut command,
        "autopostctl",
        &mut std::io::stdout(),
    );
}
