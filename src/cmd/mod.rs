//! CLI command implementations.
//!
//! | Module    | Commands handled            |
//! |-----------|-----------------------------|
//! | `watch`   | `Watch`                     |
//! | `backend` | `Fetch`, `Lines`, `Health`  |
//! | `config`  | `Config`                    |

pub mod backend;
pub mod config;
pub mod watch;

pub use backend::{cmd_fetch, cmd_health, cmd_lines};
pub use config::cmd_config;
pub use watch::cmd_watch;

use linewatch::Identity;

/// Parse a display identity. A bare value is taken as a line code.
pub fn parse_identity(input: &str) -> Result<Identity, String> {
    let parsed = if input.contains(':') {
        Identity::parse(input)
    } else {
        Identity::line(input)
    };
    parsed.map_err(|e| e.to_string())
}

/// Apply `--index` to line identities; other kinds ignore it.
pub fn with_index(identity: Identity, index: Option<u32>) -> Identity {
    match index {
        Some(i) => identity.with_index(i),
        None => identity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identity_accepts_bare_codes() {
        assert_eq!(parse_identity("KV07M01").unwrap(), Identity::line("KV07M01").unwrap());
        assert_eq!(
            parse_identity("center:TS1/1").unwrap(),
            Identity::center("TS1", "1").unwrap()
        );
        assert!(parse_identity("").is_err());
        assert!(parse_identity("bogus:x").is_err());
    }

    #[test]
    fn test_with_index_only_touches_lines() {
        let line = with_index(Identity::line("L1").unwrap(), Some(2));
        assert_eq!(line, Identity::line("L1").unwrap().with_index(2));
        let center = Identity::center("TS1", "1").unwrap();
        assert_eq!(with_index(center.clone(), Some(2)), center);
    }
}
