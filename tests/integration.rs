use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

fn scenesync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("scenesync");
    path
}

/// Embeds a digest as `[count of 猫, count of 雨, 1.0]`.
fn fake_vector(text: &str) -> Vec<f32> {
    vec![
        text.matches('猫').count() as f32,
        text.matches('雨').count() as f32,
        1.0,
    ]
}

/// Serve a fake Ollama `/api/embed` on a background runtime.
fn spawn_fake_ollama() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().route(
        "/api/embed",
        post(|Json(body): Json<Value>| async move {
            let embeddings: Vec<Vec<f32>> = body["input"]
                .as_array()
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|t| fake_vector(t.as_str().unwrap_or_default()))
                        .collect()
                })
                .unwrap_or_default();
            Json(json!({ "embeddings": embeddings }))
        }),
    );

    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    addr
}

fn setup_test_env(embedding: Option<SocketAddr>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let embedding_section = match embedding {
        Some(addr) => format!(
            r#"[embedding]
provider = "ollama"
model = "fake-embed"
dims = 3
url = "http://{}"
max_retries = 0
timeout_secs = 5
"#,
            addr
        ),
        None => String::new(),
    };

    let config_content = format!(
        r#"[db]
path = "{}/data/scenes.sqlite"

{}
[index]
provider = "sqlite"
batch_size = 2
"#,
        root.display(),
        embedding_section
    );

    let config_path = config_dir.join("scenesync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_scenesync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = scenesync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run scenesync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add_scene(config_path: &Path, args: &[&str]) -> String {
    let mut full = vec!["scene", "add"];
    full.extend_from_slice(args);
    let (stdout, stderr, success) = run_scenesync(config_path, &full);
    assert!(success, "scene add failed: stdout={}, stderr={}", stdout, stderr);
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("id: "))
        .map(str::to_string)
        .unwrap_or_else(|| panic!("no id in output: {}", stdout))
}

fn show_scene(config_path: &Path, id: &str) -> Value {
    let (stdout, stderr, success) = run_scenesync(config_path, &["scene", "show", id]);
    assert!(success, "scene show failed: stderr={}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_scenesync(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/scenes.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(None);

    let (_, _, success1) = run_scenesync(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_scenesync(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_scene_add_show_and_list() {
    let (_tmp, config_path) = setup_test_env(None);
    run_scenesync(&config_path, &["init"]);

    let id = add_scene(
        &config_path,
        &[
            "--chapter", "1", "--title", "出会い", "--plot", "猫が鳴いた", "--location", "庭",
            "--mood", "切ない",
        ],
    );

    let shown = show_scene(&config_path, &id);
    assert_eq!(shown["external_id"], "plot-ch1-0");
    assert_eq!(shown["digest"], "猫が鳴いた\nlocation: 庭\nmood: 切ない");
    assert_eq!(shown["scene"]["needs_indexing"], true);

    let (stdout, _, success) = run_scenesync(&config_path, &["scene", "list", "--dirty"]);
    assert!(success);
    assert!(stdout.contains(&id));
}

#[test]
fn test_scene_index_and_chapter_resolution() {
    let (_tmp, config_path) = setup_test_env(None);
    run_scenesync(&config_path, &["init"]);

    add_scene(&config_path, &["--chapter", "2", "--title", "嵐", "--plot", "a"]);
    let second = add_scene(&config_path, &["--title", "嵐", "--plot", "b"]);
    assert_eq!(show_scene(&config_path, &second)["external_id"], "plot-ch2-1");

    let (_, stderr, success) =
        run_scenesync(&config_path, &["scene", "add", "--title", "未知", "--plot", "c"]);
    assert!(!success);
    assert!(stderr.contains("Unknown chapter"));

    let (stdout, _, success) = run_scenesync(&config_path, &["chapters"]);
    assert!(success);
    assert!(stdout.contains("嵐"));
}

#[test]
fn test_character_names_resolve_to_ids() {
    let (_tmp, config_path) = setup_test_env(None);
    run_scenesync(&config_path, &["init"]);

    let (stdout, _, success) = run_scenesync(&config_path, &["character", "add", "ミオ"]);
    assert!(success);
    let character_id = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("id: "))
        .unwrap()
        .to_string();

    let id = add_scene(
        &config_path,
        &[
            "--chapter", "1", "--plot", "p", "--character", "ミオ", "--character", "manual-9",
        ],
    );
    let shown = show_scene(&config_path, &id);
    assert_eq!(
        shown["scene"]["related_characters"],
        json!([character_id, "manual-9"])
    );

    let (stdout, _, _) = run_scenesync(&config_path, &["character", "list"]);
    assert!(stdout.contains("ミオ"));
}

#[test]
fn test_sync_dry_run_changes_nothing() {
    let (_tmp, config_path) = setup_test_env(None);
    run_scenesync(&config_path, &["init"]);
    add_scene(&config_path, &["--chapter", "1", "--plot", "p", "--location", "庭"]);

    let (stdout, stderr, success) =
        run_scenesync(&config_path, &["sync", "--dry-run", "--progress", "off"]);
    assert!(success, "dry run failed: stderr={}", stderr);
    assert!(stdout.contains("dirty scenes: 1"));
    assert!(stdout.contains("plot-ch1-0"));

    let (stdout, _, _) = run_scenesync(&config_path, &["status"]);
    assert!(stdout.contains("Dirty:       1"));
    assert!(stdout.contains("Last sync:   never"));
}

#[test]
fn test_sync_requires_embedding_provider() {
    let (_tmp, config_path) = setup_test_env(None);
    run_scenesync(&config_path, &["init"]);

    let (_, stderr, success) = run_scenesync(&config_path, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("Embedding provider is disabled"));
}

#[test]
fn test_sync_clears_flags_and_search_finds_scene() {
    let addr = spawn_fake_ollama();
    let (_tmp, config_path) = setup_test_env(Some(addr));
    run_scenesync(&config_path, &["init"]);

    let cat = add_scene(
        &config_path,
        &["--chapter", "1", "--title", "出会い", "--plot", "猫が鳴いた", "--location", "庭"],
    );
    add_scene(&config_path, &["--chapter", "1", "--plot", "雨が降る", "--location", "港"]);
    add_scene(&config_path, &["--chapter", "2", "--title", "別れ", "--plot", "雨の夜"]);

    let (stdout, stderr, success) = run_scenesync(&config_path, &["sync", "--progress", "off"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("attempted: 3"));
    assert!(stdout.contains("synchronized: 3"));
    assert!(stdout.contains("failed: 0"));
    assert!(stdout.contains("model: fake-embed"));

    let (stdout, _, _) = run_scenesync(&config_path, &["status"]);
    assert!(stdout.contains("Dirty:       0"));
    assert!(stdout.contains("Vectors:     3"));
    assert!(stdout.contains("synchronized: 3 / 3"));

    // Nothing dirty: a second pass is a no-op.
    let (stdout, _, success) = run_scenesync(&config_path, &["sync", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("attempted: 0"));

    let (stdout, _, success) = run_scenesync(&config_path, &["search", "猫", "--limit", "2"]);
    assert!(success);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1."), "unexpected search output: {}", stdout);
    assert!(first.contains("plot-ch1-0"));

    // Editing re-queues exactly that scene.
    let (_, stderr, success) =
        run_scenesync(&config_path, &["scene", "edit", &cat, "--location", "屋根"]);
    assert!(success, "edit failed: {}", stderr);
    let (stdout, _, _) = run_scenesync(&config_path, &["sync", "--progress", "off"]);
    assert!(stdout.contains("attempted: 1"));
    assert!(stdout.contains("synchronized: 1"));

    let (stdout, _, _) = run_scenesync(&config_path, &["status"]);
    assert!(stdout.contains("Vectors:     3"));
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, success) =
        run_scenesync(Path::new("/nonexistent/scenesync.toml"), &["status"]);
    assert!(!success, "expected failure: stdout={}", stdout);
    assert!(stderr.contains("Failed to read config file"));
}
