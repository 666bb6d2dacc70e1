use reelswap_pipeline::config::ConfigError;

/// Server configuration loaded from environment variables.
///
/// Everything except the API token has a default suitable for local
/// development.
#[derive(Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `600`). Generous because
    /// stitching and synchronous stage calls wait on remote services.
    pub request_timeout_secs: u64,
    /// Shared secret expected in the `Authorization` header.
    pub api_token: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_origins", &self.cors_origins)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `600`                      |
    /// | `API_TOKEN`            | required                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());

        let port = match var("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => 3000,
        };

        let cors_origins: Vec<String> = var("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::Invalid {
                    name: "REQUEST_TIMEOUT_SECS",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?,
            None => 600,
        };

        let api_token = var("API_TOKEN")
            .map(|t| t.trim().to_string())
            .ok_or_else(|| ConfigError::Missing {
                name: "API_TOKEN",
                context: String::new(),
            })?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            api_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = load(&[("API_TOKEN", "secret")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.request_timeout_secs, 600);
        assert_eq!(config.api_token, "secret");
    }

    #[test]
    fn token_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing { name: "API_TOKEN", .. }));
        assert_matches!(
            load(&[("API_TOKEN", "  ")]),
            Err(ConfigError::Missing { name: "API_TOKEN", .. })
        );
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config = load(&[
            ("API_TOKEN", "t"),
            ("CORS_ORIGINS", "https://a.test, https://b.test,,"),
        ])
        .unwrap();
        assert_eq!(config.cors_origins, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn bad_port_is_reported() {
        assert_matches!(
            load(&[("API_TOKEN", "t"), ("PORT", "http")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        );
    }

    #[test]
    fn debug_output_hides_token() {
        let config = load(&[("API_TOKEN", "hunter2")]).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
