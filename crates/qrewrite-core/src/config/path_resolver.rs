use std::path::{Path, PathBuf};

/// Resolves paths written in a config file against the file's directory.
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    pub fn new(config_path: &Path) -> Self {
        let base = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base.join(p)
        }
    }

    pub fn resolve_in_place(&self, p: &mut PathBuf) {
        *p = self.resolve(p);
    }

    pub fn resolve_opt(&self, p: &mut Option<PathBuf>) {
        if let Some(inner) = p.as_mut() {
            self.resolve_in_place(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_follow_the_config_file() {
        let r = PathResolver::new(Path::new("/work/bench/qrewrite.yaml"));
        assert_eq!(r.resolve(Path::new("queries")), PathBuf::from("/work/bench/queries"));
        assert_eq!(r.resolve(Path::new("/abs/x")), PathBuf::from("/abs/x"));

        let bare = PathResolver::new(Path::new("qrewrite.yaml"));
        assert_eq!(bare.resolve(Path::new("q")), PathBuf::from("./q"));
    }
}
