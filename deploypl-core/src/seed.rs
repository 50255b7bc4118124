use std::fs;
use std::path::Path;

use deploypl_model::Node;

use crate::error::{DeployError, Result};

/// Load candidate nodes from the operator-maintained seed file.
///
/// The file carries whitespace-delimited `<name> <authority> <boot-state>`
/// triples, one per line. Only rows whose boot state is `boot` are admitted;
/// blank and malformed lines are skipped silently. Candidates come out
/// unreachable, unprofiled and unresolved.
pub fn load_seed(path: &Path) -> Result<Vec<Node>> {
    let contents = fs::read_to_string(path).map_err(|source| DeployError::Seed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_seed(&contents))
}

fn parse_seed(contents: &str) -> Vec<Node> {
    contents
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
                (Some(name), Some(authority), Some("boot"), None) => {
                    Some(Node::new(name, authority))
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploypl_model::NodeState;
    use std::io::Write;

    #[test]
    fn only_boot_rows_are_admitted() {
        let pool = parse_seed("a x boot\nb x reinstall\nc x boot\n");
        let names: Vec<&str> = pool.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn blank_and_malformed_lines_are_skipped() {
        let pool = parse_seed("\n\na x boot\nonly-two tokens\nb x boot extra-token\n   \n");
        let names: Vec<&str> = pool.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a"]);
    }

    #[test]
    fn candidates_come_out_unreachable_and_unresolved() {
        let pool = parse_seed("node1.example.edu auth1 boot\n");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].state(), NodeState::Unreachable);
        assert_eq!(pool[0].authority, "auth1");
        assert!(pool[0].addr.is_none());
    }

    #[test]
    fn unreadable_file_is_a_seed_error() {
        let err = load_seed(Path::new("/nonexistent/raw_nodes.txt")).unwrap_err();
        assert!(matches!(err, DeployError::Seed { .. }));
    }

    #[test]
    fn file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"node1.example.edu auth1 boot\n").unwrap();
        let pool = load_seed(file.path()).unwrap();
        assert_eq!(pool[0].name, "node1.example.edu");
    }
}
