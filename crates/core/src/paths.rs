use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".chatpilot"))
            .unwrap_or_else(|| PathBuf::from(".chatpilot"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Persistent browser profile holding the chat site's cookies.
    pub fn profile_dir(&self) -> PathBuf {
        self.base.join("chromedata")
    }

    /// Resolve a configured profile path: `~` is expanded and relative
    /// paths are anchored at the base directory.
    pub fn resolve_profile(&self, raw: &str) -> PathBuf {
        let expanded = match raw.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|h| h.join(rest))
                .unwrap_or_else(|| PathBuf::from(raw)),
            None => PathBuf::from(raw),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            self.base.join(expanded)
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_profile_relative_and_absolute() {
        let paths = Paths::with_base(PathBuf::from("/srv/chatpilot"));
        assert_eq!(
            paths.resolve_profile("chromedata"),
            PathBuf::from("/srv/chatpilot/chromedata")
        );
        assert_eq!(paths.resolve_profile("/tmp/profile"), PathBuf::from("/tmp/profile"));
        assert!(paths.profile_dir().starts_with(&paths.base));
    }
}
