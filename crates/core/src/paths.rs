use std::path::PathBuf;

/// Well-known locations under the webprobe home directory (`~/.webprobe`).
#[derive(Debug, Clone)]
pub struct Paths {
    base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".webprobe");
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Root for per-session artifacts (screenshots, video frames, reports).
    pub fn results_dir(&self) -> PathBuf {
        self.base.join("results")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
