use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("SONGBOX_JWT_SECRET must be set")]
    MissingJwtSecret,
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Server configuration
/// In debug builds a `.env` file is loaded first; the process environment
/// always wins over it.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// SQLite database file, created if missing
    pub database_path: String,
    /// Root directory of the media store
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    /// Upload ceiling for track requests (audio plus cover)
    pub max_track_bytes: usize,
    pub max_lyrics_bytes: usize,
    pub page_size: i64,
    /// Base URL used in share links; derived from request headers when unset
    pub public_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_path: "songbox.db".to_string(),
            upload_dir: PathBuf::from("uploads"),
            jwt_secret: String::new(),
            max_track_bytes: 100 << 20,
            max_lyrics_bytes: 10 << 20,
            page_size: 20,
            public_base_url: None,
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Result<Self, ConfigError> {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            }
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from a variable lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let jwt_secret = lookup("SONGBOX_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingJwtSecret)?;

        let config = Config {
            bind_addr: parse_var(&lookup, "SONGBOX_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            database_path: lookup("SONGBOX_DATABASE_PATH").unwrap_or(defaults.database_path),
            upload_dir: lookup("SONGBOX_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            jwt_secret,
            max_track_bytes: parse_var(&lookup, "SONGBOX_MAX_TRACK_BYTES")?
                .unwrap_or(defaults.max_track_bytes),
            max_lyrics_bytes: parse_var(&lookup, "SONGBOX_MAX_LYRICS_BYTES")?
                .unwrap_or(defaults.max_lyrics_bytes),
            page_size: parse_var(&lookup, "SONGBOX_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            public_base_url: lookup("SONGBOX_PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        };

        info!(
            "Config: listening on {}, database {}, uploads in {}",
            config.bind_addr,
            config.database_path,
            config.upload_dir.display()
        );
        Ok(config)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("SONGBOX_JWT_SECRET", "s")])).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_track_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_lyrics_bytes, 10 * 1024 * 1024);
        assert!(config.public_base_url.is_none());
    }

    #[test]
    fn test_overrides_and_errors() {
        let config = Config::from_lookup(lookup_from(&[
            ("SONGBOX_JWT_SECRET", "s"),
            ("SONGBOX_BIND_ADDR", "127.0.0.1:9000"),
            ("SONGBOX_PUBLIC_BASE_URL", "https://music.example.com/"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(
            config.public_base_url.as_deref(),
            Some("https://music.example.com")
        );

        assert!(matches!(
            Config::from_lookup(lookup_from(&[])),
            Err(ConfigError::MissingJwtSecret)
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[
                ("SONGBOX_JWT_SECRET", "s"),
                ("SONGBOX_PAGE_SIZE", "lots")
            ])),
            Err(ConfigError::Invalid { name: "SONGBOX_PAGE_SIZE", .. })
        ));
    }
}
