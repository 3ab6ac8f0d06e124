use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct HealthmateConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub completion: CompletionConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `postgres` or `memory`
    #[serde(default = "default_store_backend")]
    pub backend: String,
    pub url: String,
    pub max_connections: u32,
}

fn default_store_backend() -> String {
    "postgres".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the provider key.
    pub api_key_env: String,
    pub timeout_seconds: u64,
    /// Zero disables the retry wrapper entirely.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-8b-8192".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_seconds: 60,
            max_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    pub dir: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: "media/prescription".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Header carrying the authenticated username, set by the fronting proxy.
    pub user_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: "x-healthmate-user".to_string(),
        }
    }
}

impl HealthmateConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("HEALTHMATE").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
