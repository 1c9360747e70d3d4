//! Integration tests for the boson binary.
//!
//! Each test writes a small engine tree into a temporary directory: one
//! target manifest whose actions are shell commands copying a source file
//! into an object and the object into a library.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const TARGET: &str = "Game:Linux:Development";

/// Temporary engine tree plus lock and user config isolation.
struct Engine {
    dir: tempfile::TempDir,
}

impl Engine {
    fn new(compile_script: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = dir.path();
        for (path, text) in [
            ("Source/Game.target.rules", "rules"),
            ("Source/Core/Core.rules", "rules"),
            ("Source/Core/Private/a.c", "#include \"a.h\"\nint a;\n"),
            ("Source/Core/Public/a.h", "struct A {};\n"),
        ] {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, text).unwrap();
        }
        let manifest = serde_json::json!({
            "rules_file": "Source/Game.target.rules",
            "modules": [{
                "name": "Core",
                "rules_file": "Source/Core/Core.rules",
                "source_dir": "Source/Core",
            }],
            "actions": [
                {
                    "kind": "compile",
                    "status": "a.c",
                    "command": "/bin/sh",
                    "arguments": ["-c", compile_script],
                    "prerequisites": ["Source/Core/Private/a.c"],
                    "produced": ["Intermediate/{platform}/a.o"],
                    "include_paths": ["Source/Core/Public"],
                },
                {
                    "kind": "link",
                    "status": "Game-Core.so",
                    "command": "/bin/sh",
                    "arguments": ["-c", "cp Intermediate/{platform}/a.o Binaries/{platform}/Game-Core.so"],
                    "prerequisites": ["Intermediate/{platform}/a.o"],
                    "produced": ["Binaries/{platform}/Game-Core.so"],
                },
            ],
            "outputs": ["Binaries/{platform}/Game-Core.so"],
        });
        std::fs::create_dir_all(root.join("Targets")).unwrap();
        std::fs::write(root.join("Targets/Game.target.json"), manifest.to_string()).unwrap();
        Self { dir }
    }

    fn working() -> Self {
        Self::new("cp Source/Core/Private/a.c Intermediate/{platform}/a.o")
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn library(&self) -> PathBuf {
        self.root().join("Binaries/Linux/Game-Core.so")
    }

    fn plan_cache(&self) -> PathBuf {
        self.root()
            .join("Intermediate/Build/Linux/Game/Development/BuildPlan.bin")
    }

    fn boson(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_boson"))
            .args(args)
            .arg("--engine-dir")
            .arg(self.root())
            .current_dir(self.root())
            .env("BOSON_LOCK_DIR", self.root().join("locks"))
            .env("BOSON_USER_CONFIG", self.root().join("no-user-config.toml"))
            .output()
            .expect("failed to execute boson")
    }
}

fn assert_success(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "boson failed (exit={:?}):\nstdout:\n{stdout}\nstderr:\n{stderr}",
        output.status.code(),
    );
    stdout
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn build_then_up_to_date() {
    let engine = Engine::working();

    let stdout = assert_success(&engine.boson(&["build", TARGET]));
    assert!(stdout.contains("Build succeeded"), "stdout:\n{stdout}");
    assert!(engine.library().is_file());
    assert!(engine.plan_cache().is_file(), "build plan was not cached");

    let stdout = assert_success(&engine.boson(&["build", TARGET]));
    assert!(stdout.contains("up to date"), "stdout:\n{stdout}");
}

#[test]
fn failing_action_exits_one() {
    let engine = Engine::new("echo 'a.c: error' >&2; exit 2");

    let output = engine.boson(&["build", TARGET]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("a.c: error"), "stderr:\n{stderr}");
    assert!(!engine.library().exists());
}

#[test]
fn gather_only_then_assemble_only() {
    let engine = Engine::working();

    let stdout = assert_success(&engine.boson(&["build", TARGET, "--gather-only"]));
    assert!(stdout.contains("build plan written"), "stdout:\n{stdout}");
    assert!(engine.plan_cache().is_file());
    assert!(!engine.library().exists(), "gather-only must not build");

    let stdout = assert_success(&engine.boson(&["build", TARGET, "--assemble-only", "-v"]));
    assert!(stdout.contains("build plan cache: valid"), "stdout:\n{stdout}");
    assert!(engine.library().is_file());
}

#[test]
fn gather_only_without_plan_cache_writes_nothing() {
    let engine = Engine::working();
    let config = engine.root().join("Config/BuildConfiguration.toml");
    std::fs::create_dir_all(config.parent().unwrap()).unwrap();
    std::fs::write(&config, "[build]\nuse-plan-cache = false\n").unwrap();

    let stdout = assert_success(&engine.boson(&["build", TARGET, "--gather-only"]));
    assert!(!stdout.contains("build plan written"), "stdout:\n{stdout}");
    assert!(!engine.plan_cache().exists());
    assert!(!engine.library().exists());
}

#[test]
fn source_change_rebuilds() {
    let engine = Engine::working();
    assert_success(&engine.boson(&["build", TARGET]));

    let source = engine.root().join("Source/Core/Private/a.c");
    std::fs::write(&source, "int a = 2;\n").unwrap();
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(&source)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let stdout = assert_success(&engine.boson(&["build", TARGET]));
    assert!(stdout.contains("Build succeeded"), "stdout:\n{stdout}");
    assert_eq!(std::fs::read_to_string(engine.library()).unwrap(), "int a = 2;\n");
}

#[test]
fn invalidate_and_clean() {
    let engine = Engine::working();
    assert_success(&engine.boson(&["build", TARGET]));

    let stdout = assert_success(&engine.boson(&["invalidate", TARGET]));
    assert!(stdout.contains("Removed"), "stdout:\n{stdout}");
    assert!(!engine.plan_cache().exists());

    assert_success(&engine.boson(&["build", TARGET]));
    assert_success(&engine.boson(&["clean", TARGET]));
    assert!(!engine.root().join("Intermediate/Build/Linux/Game/Development").exists());
}

#[test]
fn unknown_target_is_an_error() {
    let engine = Engine::working();
    let output = engine.boson(&["build", "Editor:Linux:Development"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Editor"), "stderr:\n{stderr}");
}
