//! Init command - write a starter plugin manifest

use crate::cli::args::InitArgs;
use crate::error::{KeelError, KeelResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Template for a new plugin manifest
pub(crate) const INIT_TEMPLATE: &str = r#"# keel plugin manifest
#
# Each [[hooks]] entry binds one shell command to one lifecycle phase:
#   build:   configure -> pre_build -> build -> post_build
#   release: configure -> pre_release -> release -> post_release
# configure, build and release are required; the others default to no-ops.
#
# Commands are rendered before they run. Available placeholders:
#   {{ ref }} {{ sha }} {{ short_sha }} {{ actor }} {{ repo_path }}
#   {{ builds_path }} {{ db_path }} {{ plugin_dir }} {{ keel_bin }}
# and, in every phase after configure:
#   {{ build_path }} {{ config.KEY }}
# The same values are exported as KEEL_* environment variables.

shell = "sh"

[[hooks]]
phase = "configure"
# Print KEY=VALUE lines; they become the config of every later phase
run = "echo SERVICE=app"

[[hooks]]
phase = "build"
run = "git -C {{ repo_path }} archive {{ sha }} | tar -x -C {{ build_path }}"

# [[hooks]]
# phase = "post_build"
# run = '''
# sum=$("$KEEL_BIN" cache checksum requirements.txt)
# "$KEEL_BIN" cache check deps "$sum" || {
#     pip install -r requirements.txt && "$KEEL_BIN" cache set deps "$sum"
# }
# '''

[[hooks]]
phase = "release"
run = "echo releasing {{ short_sha }} as {{ config.SERVICE }}"
"#;

/// Execute the init command
pub async fn execute(args: InitArgs) -> KeelResult<()> {
    let ctx = UiContext::detect();
    let manifest_path = args.path;

    if manifest_path.exists() && !args.force {
        return Err(KeelError::User(format!(
            "{} already exists. Use --force to overwrite.",
            manifest_path.display()
        )));
    }

    if let Some(parent) = manifest_path.parent() {
        ensure_dir(parent).await?;
    }

    fs::write(&manifest_path, INIT_TEMPLATE)
        .await
        .map_err(|e| KeelError::io(format!("writing {}", manifest_path.display()), e))?;

    ui::step_ok_detail(
        &ctx,
        "Created plugin manifest",
        &manifest_path.display().to_string(),
    );
    ui::remark(&ctx, "Next: keel install --plugin <manifest> --repo-path <repo.git> ...");

    Ok(())
}

async fn ensure_dir(dir: &Path) -> KeelResult<()> {
    if !dir.as_os_str().is_empty() && !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| KeelError::io(format!("creating directory {}", dir.display()), e))?;
    }
    Ok(())
}
