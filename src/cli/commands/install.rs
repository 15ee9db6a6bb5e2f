//! Install command - wire keel into a bare repository's post-receive hook

use super::{keel_bin, Settings};
use crate::cli::args::InstallArgs;
use crate::config::absolutize;
use crate::error::{KeelError, KeelResult};
use crate::pipeline::{load_registry, TemplateEnv};
use crate::snapshot::GitResolver;
use crate::ui::{self, UiContext, HOOK_ENV};
use std::path::Path;
use tokio::fs;

/// post-receive hook installed into the repository
///
/// Deleted refs arrive with an all-zero new revision and are skipped.
/// `--verbose` relays hook output to the pushing client.
const POST_RECEIVE_TEMPLATE: &str = r#"#!/bin/sh
# Installed by keel {{ version }}; re-run `keel install --force` to update.
unset GIT_DIR
export {{ hook_env }}=post-receive
actor="${KEEL_ACTOR:-${USER:-git}}"
status=0

while read -r oldrev newrev refname; do
    case "$newrev" in
        *[!0]*) ;;
        *) continue ;;
    esac

    {{ cli_path }} --verbose \
        --plugin {{ plugin }} \
        --builds-path {{ builds_path }} \
        --db-path {{ db_path }} \
        --repo-path {{ repo_path }} \
        build "$refname" "$actor" --release || status=$?
done

exit $status
"#;

/// Execute the install command
pub async fn execute(args: InstallArgs, settings: &Settings) -> KeelResult<()> {
    let ctx = UiContext::detect();
    let repo_path = settings.paths.repo_path()?;
    let plugin = settings.paths.plugin()?;
    let builds_path = settings.paths.builds_path()?;
    let db_path = settings.paths.db_path()?;

    if !plugin.is_file() {
        return Err(KeelError::PathNotFound(plugin.to_path_buf()));
    }
    if !GitResolver::new().is_bare(repo_path).await? {
        return Err(KeelError::NotBareRepository(repo_path.to_path_buf()));
    }

    let cli_path = match args.cli_path {
        Some(path) => absolutize(&path)?,
        None => keel_bin()?,
    };

    // Refuse to install a hook that would fail on every push
    load_registry(plugin, &cli_path)?;

    let hook = render_hook(&cli_path, plugin, builds_path, db_path, repo_path)?;
    let hook_path = repo_path.join("hooks").join("post-receive");
    write_hook(&hook_path, &hook, args.force).await?;

    ui::step_ok_detail(&ctx, "Installed post-receive hook", &hook_path.display().to_string());
    ui::key_value(&ctx, "plugin", &plugin.display().to_string());
    ui::key_value(&ctx, "builds", &builds_path.display().to_string());
    ui::remark(&ctx, "Every push now builds and releases the pushed ref");
    Ok(())
}

fn render_hook(
    cli_path: &Path,
    plugin: &Path,
    builds_path: &Path,
    db_path: &Path,
    repo_path: &Path,
) -> KeelResult<String> {
    TemplateEnv::new()
        .with("version", env!("CARGO_PKG_VERSION"))
        .with("hook_env", HOOK_ENV)
        .with("cli_path", shell_quote(cli_path))
        .with("plugin", shell_quote(plugin))
        .with("builds_path", shell_quote(builds_path))
        .with("db_path", shell_quote(db_path))
        .with("repo_path", shell_quote(repo_path))
        .render(POST_RECEIVE_TEMPLATE)
}

/// Single-quote a path for sh
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

async fn write_hook(hook_path: &Path, contents: &str, force: bool) -> KeelResult<()> {
    if hook_path.exists() && !force {
        return Err(KeelError::User(format!(
            "{} already exists. Use --force to overwrite.",
            hook_path.display()
        )));
    }

    if let Some(parent) = hook_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| KeelError::io(format!("creating {}", parent.display()), e))?;
    }

    fs::write(hook_path, contents)
        .await
        .map_err(|e| KeelError::io(format!("writing {}", hook_path.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(hook_path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| KeelError::io(format!("chmod {}", hook_path.display()), e))?;
    }

    Ok(())
}
