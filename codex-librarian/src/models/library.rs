//! Library rows

use std::path::Path;

/// One watched library root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub id: i64,
    pub path: String,
    /// Holds only custom cover images, never comics
    pub covers_only: bool,
    pub update_in_progress: bool,
}

impl Library {
    pub fn root(&self) -> &Path {
        Path::new(&self.path)
    }

    /// Every ancestor directory of `path` strictly inside the library root,
    /// nearest first
    pub fn ancestor_folders(&self, path: &str) -> Vec<String> {
        let root = self.root();
        Path::new(path)
            .ancestors()
            .skip(1)
            .take_while(|p| p.starts_with(root) && *p != root)
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    /// Containing directory if it is inside the library, `None` at the root
    pub fn parent_folder(&self, path: &str) -> Option<String> {
        self.ancestor_folders(path).into_iter().next()
    }

    /// True if `path` is the root or lies beneath it
    pub fn contains(&self, path: &str) -> bool {
        Path::new(path).starts_with(self.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> Library {
        Library {
            id: 1,
            path: "/lib".to_string(),
            covers_only: false,
            update_in_progress: false,
        }
    }

    #[test]
    fn test_ancestor_folders_stop_at_root() {
        assert_eq!(
            lib().ancestor_folders("/lib/Pub/Series v1/issue 1.cbz"),
            vec!["/lib/Pub/Series v1".to_string(), "/lib/Pub".to_string()]
        );
        assert!(lib().ancestor_folders("/lib/issue 1.cbz").is_empty());
    }

    #[test]
    fn test_parent_folder() {
        assert_eq!(lib().parent_folder("/lib/a/b.cbz").as_deref(), Some("/lib/a"));
        assert_eq!(lib().parent_folder("/lib/b.cbz"), None);
        assert_eq!(lib().parent_folder("/elsewhere/b.cbz"), None);
    }

    #[test]
    fn test_contains_is_component_wise() {
        assert!(lib().contains("/lib/a.cbz"));
        assert!(!lib().contains("/library/a.cbz"));
    }
}
