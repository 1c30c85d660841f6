//! Start/stop script verification using marker files

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Helper for verifying script execution via marker files
#[derive(Clone)]
pub struct MarkerFileHelper {
    base_dir: PathBuf,
}

impl MarkerFileHelper {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Get the path to a marker file
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.marker", name))
    }

    /// A shell command that creates the marker
    pub fn touch_command(&self, name: &str) -> String {
        format!("touch '{}'", self.marker_path(name).display())
    }

    /// A shell command that appends one line to the marker each time it runs
    pub fn append_command(&self, name: &str, line: &str) -> String {
        format!("echo '{}' >> '{}'", line, self.marker_path(name).display())
    }

    /// A shell command that writes `$VAR` into the marker, for env assertions
    pub fn capture_env_command(&self, name: &str, var: &str) -> String {
        format!(
            "printf '%s' \"${}\" > '{}'",
            var,
            self.marker_path(name).display()
        )
    }

    pub fn marker_exists(&self, name: &str) -> bool {
        self.marker_path(name).exists()
    }

    pub fn read_marker(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.marker_path(name)).ok()
    }

    /// Number of lines in a marker (how many times an appending command ran)
    pub fn count_marker_lines(&self, name: &str) -> usize {
        self.read_marker(name)
            .map(|content| content.lines().count())
            .unwrap_or(0)
    }

    /// Wait for a marker file to appear
    pub async fn wait_for_marker(&self, name: &str, timeout: Duration) -> bool {
        let marker_path = self.marker_path(name);
        let start = Instant::now();

        while start.elapsed() < timeout {
            if marker_path.exists() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        false
    }
}
