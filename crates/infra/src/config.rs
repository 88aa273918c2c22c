use serde::Deserialize;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBackend {
    Memory,
    Surreal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub jwt_secret: String,
    pub request_timeout_ms: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("log_format", "")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "votewatch")?
            .set_default("surreal_db", "intake")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("jwt_secret", DEV_JWT_SECRET)?
            .set_default("request_timeout_ms", 15_000)?
            .set_default("rate_limit_per_second", 20)?
            .set_default("rate_limit_burst", 60)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        let config: AppConfig = cfg.try_deserialize()?;
        config.data_backend()?;
        if config.is_production() && config.jwt_secret == DEV_JWT_SECRET {
            return Err(config::ConfigError::Message(
                "jwt_secret must be set in production".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn is_test(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }

    pub fn data_backend(&self) -> Result<DataBackend, config::ConfigError> {
        match self.data_backend.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(DataBackend::Memory),
            "surreal" | "surrealdb" => Ok(DataBackend::Surreal),
            other => Err(config::ConfigError::Message(format!(
                "unknown data_backend '{other}' (expected 'memory' or 'surreal')"
            ))),
        }
    }

    pub fn uses_surreal(&self) -> bool {
        matches!(self.data_backend(), Ok(DataBackend::Surreal))
    }

    /// `json` or `compact`; empty picks json in production.
    pub fn json_logs(&self) -> bool {
        match self.log_format.trim().to_ascii_lowercase().as_str() {
            "json" => true,
            "compact" | "pretty" => false,
            _ => self.is_production(),
        }
    }

    /// Config for tests: in-memory backend, rate limiting off.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            app_env: "test".to_string(),
            port: 0,
            log_level: "warn".to_string(),
            log_format: "compact".to_string(),
            data_backend: "memory".to_string(),
            surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
            surreal_ns: "votewatch".to_string(),
            surreal_db: "intake_test".to_string(),
            surreal_user: "root".to_string(),
            surreal_pass: "root".to_string(),
            jwt_secret: jwt_secret.to_string(),
            request_timeout_ms: 15_000,
            rate_limit_per_second: 20,
            rate_limit_burst: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let mut config = AppConfig::for_tests("secret");
        config.data_backend = "postgres".into();
        assert!(config.data_backend().is_err());
        assert!(!config.uses_surreal());

        config.data_backend = " SurrealDB ".into();
        assert_eq!(config.data_backend().ok(), Some(DataBackend::Surreal));
    }

    #[test]
    fn log_format_defaults_by_environment() {
        let mut config = AppConfig::for_tests("secret");
        config.log_format = String::new();
        assert!(!config.json_logs());
        config.app_env = "production".into();
        assert!(config.json_logs());
        config.log_format = "compact".into();
        assert!(!config.json_logs());
    }
}
