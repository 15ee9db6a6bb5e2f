//! Release command - run the release pipeline and repoint `latest`

use super::{report_outcome, Settings};
use crate::cli::args::ReleaseArgs;
use crate::error::KeelResult;
use crate::ledger::PhaseGroup;
use crate::orchestrator::RunOptions;
use crate::ui::UiContext;

/// Execute the release command
pub async fn execute(args: ReleaseArgs, settings: &Settings) -> KeelResult<()> {
    let ctx = UiContext::detect();
    let orchestrator = settings.orchestrator()?;
    let opts = RunOptions::new(args.actor).with_retry(args.retry);

    let outcome = orchestrator.release(&args.reference, &opts).await?;
    report_outcome(&ctx, PhaseGroup::Release, &outcome);
    Ok(())
}
