//! Integration tests for keel

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn keel() -> Command {
        cargo_bin_cmd!("keel")
    }

    #[test]
    fn help_displays() {
        keel()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build and release orchestrator"));
    }

    #[test]
    fn version_displays() {
        keel()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("keel"));
    }

    #[test]
    fn build_requires_actor() {
        keel().args(["build", "main"]).assert().failure();
    }

    #[test]
    fn init_writes_manifest_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("keel.toml");

        keel()
            .arg("init")
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Created plugin manifest"));
        assert!(path.exists());

        keel()
            .arg("init")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn missing_builds_path_is_a_config_error() {
        let temp = tempfile::TempDir::new().unwrap();
        keel()
            .env("KEEL_CONFIG", temp.path().join("config.toml"))
            .env_remove("KEEL_BUILDS_PATH")
            .env_remove("KEEL_DB_PATH")
            .args(["status"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Missing required setting"));
    }
}

mod cache_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn keel(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("keel");
        cmd.env("KEEL_CONFIG", temp.path().join("config.toml"))
            .env("KEEL_DB_PATH", temp.path().join("keel.db"));
        cmd
    }

    #[test]
    fn set_then_check() {
        let temp = TempDir::new().unwrap();

        keel(&temp)
            .args(["cache", "check", "deps", "abc"])
            .assert()
            .failure();

        keel(&temp).args(["cache", "set", "deps", "abc"]).assert().success();

        keel(&temp)
            .args(["cache", "check", "deps", "abc"])
            .assert()
            .success();
        keel(&temp)
            .args(["cache", "check", "deps", "def"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("deps"));

        keel(&temp)
            .args(["cache", "get", "deps"])
            .assert()
            .success()
            .stdout("abc\n");
    }

    #[test]
    fn get_missing_key_fails() {
        let temp = TempDir::new().unwrap();
        keel(&temp)
            .args(["cache", "get", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache key not found"));
    }

    #[test]
    fn checksum_prints_sha256() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("input.txt");
        std::fs::write(&file, "abc").unwrap();

        keel(&temp)
            .args(["cache", "checksum"])
            .arg(&file)
            .assert()
            .success()
            .stdout("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\n");
    }
}

mod pipeline_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const PLUGIN: &str = r#"
[[hooks]]
phase = "configure"
run = "echo GREETING=hello"

[[hooks]]
phase = "build"
run = "echo {{ config.GREETING }} {{ actor }} > {{ build_path }}/built.txt"

[[hooks]]
phase = "release"
run = "test -f {{ build_path }}/built.txt"
"#;

    const SLOW_PLUGIN: &str = r#"
[[hooks]]
phase = "configure"
run = "true"

[[hooks]]
phase = "build"
run = "sleep 2; echo done > {{ build_path }}/built.txt"

[[hooks]]
phase = "release"
run = "true"
"#;

    const FAILING_PLUGIN: &str = r#"
[[hooks]]
phase = "configure"
run = "true"

[[hooks]]
phase = "pre_build"
run = "echo boom >&2; exit 3"

[[hooks]]
phase = "build"
run = "touch {{ build_path }}/built.txt"

[[hooks]]
phase = "release"
run = "true"
"#;

    struct Fixture {
        temp: TempDir,
        repo: PathBuf,
        builds: PathBuf,
        plugin: PathBuf,
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .current_dir(dir)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .args([
                "-c",
                "user.name=keel",
                "-c",
                "user.email=keel@example.com",
                "-c",
                "init.defaultBranch=main",
            ])
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?} failed: {output:?}");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    impl Fixture {
        fn new(plugin: &str) -> Self {
            let temp = TempDir::new().unwrap();
            let work = temp.path().join("work");
            std::fs::create_dir(&work).unwrap();
            git(&work, &["init", "-q"]);
            std::fs::write(work.join("app.txt"), "v1").unwrap();
            git(&work, &["add", "."]);
            git(&work, &["commit", "-q", "-m", "first"]);
            git(&work, &["branch", "-M", "main"]);

            git(temp.path(), &["clone", "-q", "--bare", "work", "app.git"]);

            let plugin_path = temp.path().join("keel.toml");
            std::fs::write(&plugin_path, plugin).unwrap();

            Self {
                repo: temp.path().join("app.git"),
                builds: temp.path().join("builds"),
                plugin: plugin_path,
                temp,
            }
        }

        fn keel(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("keel");
            cmd.env("KEEL_CONFIG", self.temp.path().join("config.toml"))
                .env("KEEL_PLUGIN", &self.plugin)
                .env("KEEL_BUILDS_PATH", &self.builds)
                .env("KEEL_REPO_PATH", &self.repo)
                .env_remove("KEEL_DB_PATH");
            cmd
        }

        fn head(&self) -> String {
            git(&self.repo, &["rev-parse", "main"])
        }

        /// Unwrapped process, for running several invocations at once
        fn spawn(&self, args: &[&str]) -> std::process::Child {
            std::process::Command::new(env!("CARGO_BIN_EXE_keel"))
                .env("KEEL_CONFIG", self.temp.path().join("config.toml"))
                .env("KEEL_PLUGIN", &self.plugin)
                .env("KEEL_BUILDS_PATH", &self.builds)
                .env("KEEL_REPO_PATH", &self.repo)
                .env_remove("KEEL_DB_PATH")
                .env_remove("KEEL_LOG")
                .args(args)
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .unwrap()
        }
    }

    #[test]
    fn build_is_idempotent() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(PLUGIN);
        let sha = fx.head();

        fx.keel().args(["build", "main", "alice"]).assert().success();
        let built = std::fs::read_to_string(fx.builds.join(&sha).join("built.txt")).unwrap();
        assert_eq!(built.trim(), "hello alice");

        fx.keel()
            .args(["build", "main", "bob"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already succeeded"));

        // The second run did not rebuild
        let built = std::fs::read_to_string(fx.builds.join(&sha).join("built.txt")).unwrap();
        assert_eq!(built.trim(), "hello alice");
    }

    #[test]
    fn release_repoints_latest() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(PLUGIN);
        let sha = fx.head();

        fx.keel()
            .args(["release", "main", "alice"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No successful build"));

        fx.keel()
            .args(["build", "main", "alice", "--release"])
            .assert()
            .success();

        let target = std::fs::read_link(fx.builds.join("latest")).unwrap();
        assert_eq!(target, PathBuf::from(&sha));

        fx.keel()
            .args(["status", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("\"latest\": \"{sha}\"")));
    }

    #[test]
    fn failing_phase_is_recorded() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(FAILING_PLUGIN);
        let sha = fx.head();

        fx.keel()
            .args(["build", "main", "alice"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("pre_build"))
            .stderr(predicate::str::contains("ms"));

        fx.keel()
            .args(["status", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("{sha}\tbuild\tfailed")));

        // A failed build is not re-run implicitly
        fx.keel()
            .args(["build", "main", "alice"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--retry"));

        assert!(!fx.builds.join("latest").exists());
    }

    #[test]
    fn unknown_reference_fails_before_claim() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(PLUGIN);

        fx.keel()
            .args(["build", "no-such-branch", "alice"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Reference not found"));

        fx.keel()
            .args(["status", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn install_writes_post_receive_hook() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(PLUGIN);
        let hook = fx.repo.join("hooks").join("post-receive");
        let _ = std::fs::remove_file(&hook);

        fx.keel()
            .args(["install", "--cli-path", "/usr/local/bin/keel"])
            .assert()
            .success();

        let script = std::fs::read_to_string(&hook).unwrap();
        assert!(script.contains("'/usr/local/bin/keel'"));
        assert!(script.contains("--release"));

        fx.keel()
            .args(["install"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));
    }

    #[test]
    fn concurrent_builds_run_the_pipeline_once() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(SLOW_PLUGIN);
        let sha = fx.head();

        let first = fx.spawn(&["-v", "build", "main", "alice"]);
        let second = fx.spawn(&["-v", "build", "main", "bob"]);
        let outputs = [first.wait_with_output().unwrap(), second.wait_with_output().unwrap()];

        for output in &outputs {
            assert!(output.status.success(), "keel failed: {output:?}");
        }
        let stderr: Vec<String> = outputs
            .iter()
            .map(|o| String::from_utf8_lossy(&o.stderr).into_owned())
            .collect();
        let winners = stderr.iter().filter(|s| s.contains("claim won")).count();
        let waiting = stderr
            .iter()
            .filter(|s| s.contains("claim lost, already in progress"))
            .count();
        assert_eq!((winners, waiting), (1, 1), "stderr: {stderr:#?}");

        let built: Vec<_> = std::fs::read_dir(&fx.builds)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        assert_eq!(built, vec![sha.clone()]);

        fx.keel()
            .args(["status", "--format", "plain"])
            .assert()
            .success()
            .stdout(format!("{sha}\tbuild\tsucceeded\n"));
    }

    #[test]
    fn push_through_installed_hook_releases() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new(PLUGIN);
        let hook = fx.repo.join("hooks").join("post-receive");
        let _ = std::fs::remove_file(&hook);
        fx.keel().args(["install"]).assert().success();

        let work = fx.temp.path().join("work");
        std::fs::write(work.join("app.txt"), "v2").unwrap();
        git(&work, &["commit", "-q", "-am", "second"]);
        let pushed = git(&work, &["rev-parse", "HEAD"]);

        let output = std::process::Command::new("git")
            .current_dir(&work)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .env("KEEL_CONFIG", fx.temp.path().join("config.toml"))
            .env("KEEL_ACTOR", "carol")
            .arg("push")
            .arg(&fx.repo)
            .arg("main")
            .output()
            .unwrap();
        assert!(output.status.success(), "push failed: {output:?}");
        assert!(String::from_utf8_lossy(&output.stderr).contains("claim won"));

        let target = std::fs::read_link(fx.builds.join("latest")).unwrap();
        assert_eq!(target, PathBuf::from(&pushed));
        let built = std::fs::read_to_string(fx.builds.join(&pushed).join("built.txt")).unwrap();
        assert_eq!(built.trim(), "hello carol");
    }
}
