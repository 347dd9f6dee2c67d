use marquee_core::AppError;

/// Default location of the SQLite database file.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/marquee.db";

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>, max_connections: u32) -> Result<Self, AppError> {
        let config = Self {
            url: url.into(),
            max_connections,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (optional, defaults to `sqlite://data/marquee.db`)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into());

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Err(_) => 5,
            Ok(raw) => raw.parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid DATABASE_MAX_CONNECTIONS '{raw}': must be a positive integer"
                ))
            })?,
        };

        Self::new(url, max_connections)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !self.url.starts_with("sqlite:") {
            return Err(AppError::ConfigError(format!(
                "DATABASE_URL '{}' must be a sqlite: URL",
                self.url
            )));
        }
        if self.max_connections == 0 {
            return Err(AppError::ConfigError(
                "DATABASE_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
