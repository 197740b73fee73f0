use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use streamexec::{extract, ExecConfig, ExecError, Operation, ProgressEvent, Tool};
use tempfile::TempDir;

/// Helper to write a shell script standing in for an archiver
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn test_config(dir: &TempDir, tool: Tool) -> ExecConfig {
    ExecConfig {
        channel_dir: Some(dir.path().to_path_buf()),
        silent_mode: true,
        timeout_seconds: 2,
        ..ExecConfig::for_tool(tool, Operation::Extract)
    }
}

/// LhA progress lines end in an erase sequence and a carriage return
const LHA_EXTRACT: &str = r#"
printf '\033[1mLhA Freeware\033[0m\n'
printf ' Extracting: (   10380)  A10/data/A10\033[K\r'
sleep 0.05
printf ' Extracting: (  '
sleep 0.05
printf '  2000)  A10/readme\033[K\r'
printf ' Extracting: (     620)  A10/icon.info\033[K\n'
printf '3 files extracted, all files OK\n'
"#;

const UNZIP_EXTRACT: &str = r#"
cat <<'EOF'
Archive:  test.zip
  inflating: out/a.txt
 extracting: out/b.bin
   creating: out/dir/
  inflating: out/dir/c.txt
EOF
"#;

#[test]
fn test_extract_lha_progress() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("out");
    let script = write_script(temp_dir.path(), "lha_x.sh", LHA_EXTRACT);
    let config = test_config(&temp_dir, Tool::Lha);

    let events = Arc::new(Mutex::new(Vec::new()));
    let cb_events = Arc::clone(&events);
    let progress_cb = move |event: &ProgressEvent| {
        cb_events.lock().unwrap().push(event.clone());
        true
    };

    let stats = extract(
        &format!("sh {} {}", script.display(), dest.display()),
        Tool::Lha,
        13000,
        &config,
        &progress_cb,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert_eq!(stats.files_extracted, 3);
    assert_eq!(stats.bytes_extracted, 13000);
    assert_eq!(stats.percentage_x10, Some(1000));
    assert!(stats.completion_detected);
    assert!(!stats.destination_fallback);

    let events = events.lock().unwrap().clone();
    let filenames: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Extracted { filename, .. } => Some(filename.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(filenames, vec!["A10/data/A10", "A10/readme", "A10/icon.info"]);

    let milestones: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Milestone { percentage_x10 } => Some(*percentage_x10),
            _ => None,
        })
        .collect();
    assert_eq!(milestones, vec![798, 952, 1000]);
}

#[test]
fn test_extract_unzip_estimates_sizes() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "unzip_x.sh", UNZIP_EXTRACT);
    let config = test_config(&temp_dir, Tool::Unzip);

    let stats = extract(
        &format!("sh {} -d {}", script.display(), temp_dir.path().display()),
        Tool::Unzip,
        0,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert_eq!(stats.files_extracted, 3);
    assert_eq!(stats.bytes_extracted, 3 * config.estimated_entry_size);
    assert_eq!(stats.percentage_x10, None);
}

#[test]
fn test_extract_silent_tool_with_existing_destination() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("out");
    fs::create_dir(&dest).unwrap();
    let config = test_config(&temp_dir, Tool::Lha);

    let stats = extract(
        &format!("true {}", dest.display()),
        Tool::Lha,
        500,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert!(stats.destination_fallback);
    assert_eq!(stats.files_extracted, 0);
}

#[test]
fn test_extract_quoted_destination_with_space() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("my out");
    fs::create_dir(&dest).unwrap();
    let config = test_config(&temp_dir, Tool::Lha);

    let stats = extract(
        &format!("true '{}/'", dest.display()),
        Tool::Lha,
        500,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert!(stats.destination_fallback);
}

#[test]
fn test_extract_silent_tool_without_destination_fails() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("missing");
    let config = test_config(&temp_dir, Tool::Lha);

    let result = extract(
        &format!("true {}", dest.display()),
        Tool::Lha,
        500,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    );

    assert!(matches!(result, Err(ExecError::NoProgress { .. })));
}

#[test]
fn test_extract_cancelled_mid_stream() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        temp_dir.path(),
        "endless.sh",
        "while true; do printf ' Extracting: (     100)  f\\n'; sleep 0.02; done\n",
    );
    let config = test_config(&temp_dir, Tool::Lha);

    let seen = Arc::new(Mutex::new(0u32));
    let cb_seen = Arc::clone(&seen);
    let progress_cb = move |_: &ProgressEvent| {
        let mut count = cb_seen.lock().unwrap();
        *count += 1;
        *count < 3
    };

    let result = extract(
        &format!("sh {}", script.display()),
        Tool::Lha,
        0,
        &config,
        &progress_cb,
        Arc::new(AtomicBool::new(false)),
    );

    assert!(matches!(result, Err(ExecError::Cancelled)));
    assert_eq!(*seen.lock().unwrap(), 3);
}
