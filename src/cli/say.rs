//! One-shot "say" command

use std::error::Error;
use std::io;

use crate::cli::ChatContext;
use crate::core::session::{RejectReason, SendOutcome};
use crate::ui::printer::{interrupt, stream_turn, write_outcome};

pub async fn run_say(prompt: Vec<String>, context: &ChatContext) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: peupajoh say <prompt>");
        std::process::exit(1);
    }

    let mut controller = context.controller()?;
    controller.initialize();

    let ticket = match controller.begin_turn(&prompt) {
        Ok(ticket) => ticket,
        Err(RejectReason::Empty) => return Ok(()),
        Err(reason) => {
            eprintln!("❌ Error: could not start the turn ({reason:?})");
            std::process::exit(1);
        }
    };

    let mut stdout = io::stdout();
    let outcome = stream_turn(&mut controller, ticket, &mut stdout, interrupt()).await?;
    match outcome {
        SendOutcome::Completed => {
            write_outcome(&mut stdout, &outcome, &controller.snapshot())?;
            Ok(())
        }
        _ => {
            let mut stderr = io::stderr();
            write_outcome(&mut stderr, &outcome, &controller.snapshot())?;
            std::process::exit(1);
        }
    }
}
