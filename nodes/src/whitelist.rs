//! Node whitelisting
//!
//! When enabled only listed node ids may register, open tunnels or receive
//! traffic. Ids come either from an explicit list or from a file with one id
//! per line (blank lines and `#` comments are skipped).

use crate::error::{FleetError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    ids: Option<HashSet<String>>,
}

impl Whitelist {
    /// Whitelisting off, every node allowed
    pub fn disabled() -> Self {
        Self { ids: None }
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(
                ids.into_iter()
                    .map(|id| {
                        let id: String = id.into();
                        id.trim().to_string()
                    })
                    .filter(|id| !id.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            FleetError::Whitelist(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(Self::from_ids(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        ))
    }

    /// Build from the two configuration sources; at most one may be set
    pub fn from_sources(ids: Option<Vec<String>>, file: Option<&Path>) -> Result<Self> {
        match (ids, file) {
            (Some(_), Some(_)) => Err(FleetError::Whitelist(
                "only one source for whitelisted nodes can be set".to_string(),
            )),
            (Some(ids), None) => Ok(Self::from_ids(ids)),
            (None, Some(file)) => Self::from_file(file),
            (None, None) => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ids.is_some()
    }

    pub fn is_allowed(&self, node_id: &str) -> bool {
        match &self.ids {
            Some(ids) => ids.contains(node_id),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.as_ref().map(HashSet::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_disabled_allows_everyone() {
        let whitelist = Whitelist::disabled();
        assert!(!whitelist.is_enabled());
        assert!(whitelist.is_allowed("anyone"));
    }

    #[test]
    fn test_explicit_ids() {
        let whitelist = Whitelist::from_ids(["node-1", " node-2 ", ""]);
        assert!(whitelist.is_enabled());
        assert_eq!(whitelist.len(), 2);
        assert!(whitelist.is_allowed("node-2"));
        assert!(!whitelist.is_allowed("node-3"));
    }

    #[test]
    fn test_from_file_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# fleet members").unwrap();
        writeln!(file, "node-1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  node-2  ").unwrap();

        let whitelist = Whitelist::from_file(file.path()).unwrap();
        assert_eq!(whitelist.len(), 2);
        assert!(whitelist.is_allowed("node-1"));
        assert!(whitelist.is_allowed("node-2"));
        assert!(!whitelist.is_allowed("# fleet members"));
    }

    #[test]
    fn test_both_sources_rejected() {
        let result = Whitelist::from_sources(
            Some(vec!["a".to_string()]),
            Some(Path::new("/tmp/whitelist")),
        );
        assert!(matches!(result, Err(FleetError::Whitelist(_))));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = Whitelist::from_sources(None, Some(Path::new("/nonexistent/whitelist")));
        assert!(result.is_err());
    }
}
