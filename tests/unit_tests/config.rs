use std::io::Write;

use tacacs_core::cfg::config::{Config, LogOutput};
use tempfile_stub::NamedTempFile;

// A tiny stand-in for `tempfile` (not part of this crate's dependency
// stack): writes to a process-unique path under the OS temp dir and removes
// it on drop.
mod tempfile_stub {
    use std::path::PathBuf;

    pub struct NamedTempFile {
        path: PathBuf,
    }

    impl NamedTempFile {
        pub fn new(label: &str) -> std::io::Result<(Self, std::fs::File)> {
            let path = std::env::temp_dir().join(format!(
                "tacacs-core-test-{label}-{}-{}.yaml",
                std::process::id(),
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .expect("system clock before epoch")
                    .as_nanos()
            ));
            let file = std::fs::File::create(&path)?;
            Ok((Self { path }, file))
        }

        pub fn path(&self) -> &std::path::Path {
            &self.path
        }
    }

    impl Drop for NamedTempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn sample_yaml() -> &'static str {
    r#"
listeners:
  - Name: default
    BindAddress: "127.0.0.1:4949"
state_store:
  MaxSessions: 128
  Timeout: 60
runtime:
  SpawnWorkers: true
  ConnectionTimeout: 5
logger:
  Level: debug
  Output: stderr
"#
}

#[test]
fn loads_and_validates_config_from_disk() {
    let (tmp, mut file) = NamedTempFile::new("loads").expect("create temp file");
    file.write_all(sample_yaml().as_bytes()).expect("write temp file");
    drop(file);

    let cfg = Config::load_from_file(tmp.path()).expect("config loads");
    assert_eq!(cfg.listeners.len(), 1);
    assert_eq!(cfg.listeners[0].name, "default");
    assert_eq!(cfg.state_store.max_sessions, 128);
    assert_eq!(cfg.logger.output, LogOutput::Stderr);
}

#[test]
fn missing_file_is_a_readable_error() {
    let err = Config::load_from_file("/nonexistent/tacacsd-test.yaml").expect_err("must fail");
    assert!(err.to_string().contains("failed to read config file"));
}
