use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use streamexec::{list, ExecConfig, ExecError, Operation, ProgressEvent, StreamEnd, Tool};
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
        ..ExecConfig::for_tool(tool, Operation::List)
    }
}

const LHA_LISTING: &str = r#"
cat <<'EOF'
 Original  Packed  Ratio    Date     Time    Name
 -------- ------- ------ --------- -------- ----
    10380    6306  39.2% 06-Jul-112 19:06:46   A10/data/A10
     2000     900  55.0% 06-Jul-112 19:06:46   A10/readme
      620     310  50.0% 06-Jul-112 19:06:46   A10/icon.info
 -------- ------- ------ --------- --------
    13000    7516  42.2% 11-Jul-80 21:21:14    3 files
Operation successful.
EOF
"#;

const UNZIP_LISTING: &str = r#"
cat <<'EOF'
Archive:  test.zip
  Length      Date    Time    Name
---------  ---------- -----   ----
       13  2025-07-06 15:30   test.txt
       14  2025-07-06 15:30   subdir/nested.txt
---------                     -------
       27                     2 files
EOF
"#;

#[test]
fn test_list_lha_totals() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "listing.sh", LHA_LISTING);
    let config = test_config(&temp_dir, Tool::Lha);

    let events = Arc::new(Mutex::new(Vec::new()));
    let cb_events = Arc::clone(&events);
    let progress_cb = move |event: &ProgressEvent| {
        cb_events.lock().unwrap().push(event.clone());
        true
    };

    let stats = list(
        &format!("sh {}", script.display()),
        Tool::Lha,
        &config,
        &progress_cb,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert_eq!(stats.file_count, 3);
    assert_eq!(stats.total_size, 13000);
    assert!(stats.completion_detected);
    assert!(!stats.error_detected);
    assert_eq!(stats.stream.end, StreamEnd::Eof);
    assert_eq!(stats.exit_code, Some(0));

    let events = events.lock().unwrap().clone();
    let listed: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Listed { total_size, .. } => Some(*total_size),
            _ => None,
        })
        .collect();
    assert_eq!(listed, vec![10380, 12380, 13000]);
    assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
}

#[test]
fn test_list_unzip_skips_summary() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "unzip_listing.sh", UNZIP_LISTING);
    let config = test_config(&temp_dir, Tool::Unzip);

    let stats = list(
        &format!("sh {}", script.display()),
        Tool::Unzip,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.total_size, 27);
    assert!(!stats.completion_detected);
}

#[test]
fn test_list_without_entries_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir, Tool::Lha);

    let result = list(
        "echo 'LhA: unknown archive type'",
        Tool::Lha,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    );

    assert!(matches!(result, Err(ExecError::NoProgress { .. })));
}

#[test]
fn test_list_tool_error_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        temp_dir.path(),
        "broken.sh",
        "echo '    512     200  39.0% 01-Jan-99 00:00:00   readme'\n\
         echo '*** Error: bad header'\n\
         exit 1\n",
    );
    let config = test_config(&temp_dir, Tool::Lha);

    let stats = list(
        &format!("sh {}", script.display()),
        Tool::Lha,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    // Non-zero exit alone does not fail an invocation that made progress
    assert_eq!(stats.file_count, 1);
    assert!(stats.error_detected);
    assert_eq!(stats.exit_code, Some(1));
}

#[test]
fn test_list_cancelled_by_callback() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "listing.sh", LHA_LISTING);
    let config = test_config(&temp_dir, Tool::Lha);

    let result = list(
        &format!("sh {}", script.display()),
        Tool::Lha,
        &config,
        &|event: &ProgressEvent| !matches!(event, ProgressEvent::Listed { file_count: 2, .. }),
        Arc::new(AtomicBool::new(false)),
    );

    assert!(matches!(result, Err(ExecError::Cancelled)));
}

#[test]
fn test_list_cancelled_by_flag() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "listing.sh", LHA_LISTING);
    let config = test_config(&temp_dir, Tool::Lha);

    let result = list(
        &format!("sh {}", script.display()),
        Tool::Lha,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(true)),
    );

    assert!(matches!(result, Err(ExecError::Cancelled)));
}

#[test]
fn test_list_leaves_no_channel_behind() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(temp_dir.path(), "listing.sh", LHA_LISTING);
    let config = test_config(&temp_dir, Tool::Lha);

    list(
        &format!("sh {}", script.display()),
        Tool::Lha,
        &config,
        &|_: &ProgressEvent| true,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("lha_list."))
        .collect();
    assert!(leftovers.is_empty());
}
