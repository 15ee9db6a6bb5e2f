//! Build command - build a reference, optionally releasing it

use super::{report_outcome, Settings};
use crate::cli::args::BuildArgs;
use crate::error::KeelResult;
use crate::ledger::PhaseGroup;
use crate::orchestrator::RunOptions;
use crate::ui::UiContext;

/// Execute the build command
pub async fn execute(args: BuildArgs, settings: &Settings) -> KeelResult<()> {
    let ctx = UiContext::detect();
    let orchestrator = settings.orchestrator()?;
    let opts = RunOptions::new(args.actor).with_retry(args.retry);

    if args.release {
        let run = orchestrator
            .build_and_release(&args.reference, &opts)
            .await?;
        report_outcome(&ctx, PhaseGroup::Build, &run.build);
        if let Some(release) = &run.release {
            report_outcome(&ctx, PhaseGroup::Release, release);
        }
    } else {
        let outcome = orchestrator.build(&args.reference, &opts).await?;
        report_outcome(&ctx, PhaseGroup::Build, &outcome);
    }

    Ok(())
}
