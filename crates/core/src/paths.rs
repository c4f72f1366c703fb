use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".tabrelay"))
            .unwrap_or_else(|| PathBuf::from(".tabrelay"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Saved screenshot payloads from the `send` CLI.
    pub fn media_dir(&self) -> PathBuf {
        self.base.join("media")
    }

    /// Profile directory for browsers this process launches itself.
    pub fn profile_dir(&self) -> PathBuf {
        self.base.join("profile")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.media_dir())?;
        std::fs::create_dir_all(self.profile_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
