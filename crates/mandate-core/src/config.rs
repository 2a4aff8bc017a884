//! Configuration defaults and environment helpers.
//!
//! Central place for tunables so constants are not redefined across
//! crates.

/// Command queue defaults.
pub mod commands {
    /// Default number of delivery attempts before a command expires.
    pub const DEFAULT_TTL: u32 = 5;
}

/// Store defaults.
pub mod store {
    /// Default database file name.
    pub const DEFAULT_DB_FILE: &str = "mandate.redb";
}

/// Environment variable names.
pub mod env_vars {
    use std::path::PathBuf;

    /// Path of the store database file.
    pub const STORE_PATH: &str = "MANDATE_STORE_PATH";

    /// Default command ttl override.
    pub const COMMAND_TTL: &str = "MANDATE_COMMAND_TTL";

    /// Resolve the store path from the environment, or the default
    /// file in the current directory.
    pub fn store_path() -> PathBuf {
        std::env::var(STORE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(super::store::DEFAULT_DB_FILE))
    }

    /// Resolve the default command ttl from the environment.
    pub fn command_ttl() -> u32 {
        std::env::var(COMMAND_TTL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(super::commands::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_default() {
        assert_eq!(commands::DEFAULT_TTL, 5);
    }
}
