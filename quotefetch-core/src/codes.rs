//! Instrument code lists.
//!
//! A code list is a plain text file with one code per line. Lines are
//! trimmed but never dropped or deduplicated: N lines means N fetch
//! attempts, in file order.

use crate::config::ConfigError;
use std::path::{Path, PathBuf};

/// Find `file_name` in the first search directory that contains it.
pub fn resolve_code_file(file_name: &str, search_dirs: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    search_dirs
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ConfigError::CodeFileNotFound {
            file_name: file_name.to_string(),
            searched: search_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

pub fn parse_codes(content: &str) -> Vec<String> {
    content.lines().map(|line| line.trim().to_string()).collect()
}

pub fn read_codes(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_codes(content.trim_start_matches('\u{feff}')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_blank_and_duplicate_lines() {
        let codes = parse_codes("AAPL\n  MSFT \n\nAAPL\n");
        assert_eq!(codes, vec!["AAPL", "MSFT", "", "AAPL"]);
    }

    #[test]
    fn handles_crlf() {
        assert_eq!(parse_codes("115.ZCM\r\n113.RBM\r\n"), vec!["115.ZCM", "113.RBM"]);
    }

    #[test]
    fn resolves_in_search_order() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("a");
        let second = root.path().join("b");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("us.txt"), "SPY\n").unwrap();

        let dirs = vec![first.clone(), second.clone()];
        assert_eq!(resolve_code_file("us.txt", &dirs).unwrap(), second.join("us.txt"));

        std::fs::write(first.join("us.txt"), "QQQ\n").unwrap();
        assert_eq!(resolve_code_file("us.txt", &dirs).unwrap(), first.join("us.txt"));
    }

    #[test]
    fn missing_file_lists_searched_dirs() {
        let root = tempfile::tempdir().unwrap();
        let err = resolve_code_file("nope.txt", &[root.path().to_path_buf()]).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[test]
    fn read_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.txt");
        std::fs::write(&path, "\u{feff}AAPL\nMSFT").unwrap();
        assert_eq!(read_codes(&path).unwrap(), vec!["AAPL", "MSFT"]);
    }
}
