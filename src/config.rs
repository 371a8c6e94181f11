// ⚙️ Configuration - credentials from the environment, options from the CLI
//
// Read once at start and passed into the loader; nothing reads the
// environment after that.

use crate::error::LoadError;
use crate::store::TableLayout;
use envconfig::Envconfig;
use std::collections::HashMap;
use std::time::Duration;

/// Rows per write when nothing else is asked for
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Envconfig)]
struct Environment {
    #[envconfig(from = "SUPABASE_URL")]
    url: Option<String>,

    /// Name the web app uses; accepted when `SUPABASE_URL` is unset
    #[envconfig(from = "NEXT_PUBLIC_SUPABASE_URL")]
    public_url: Option<String>,

    #[envconfig(from = "SUPABASE_SERVICE_ROLE_KEY")]
    service_role_key: Option<String>,

    #[envconfig(from = "SEED_HTTP_TIMEOUT_SECS", default = "30")]
    http_timeout_secs: u64,
}

// ============================================================================
// REMOTE CONFIG
// ============================================================================

/// Where the hosted store lives and how to authenticate against it
#[derive(Clone)]
pub struct RemoteConfig {
    base_url: url::Url,
    service_role_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url.as_str())
            .field("service_role_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(base_url: &str, service_role_key: &str) -> Result<Self, LoadError> {
        let base_url = base_url.trim();
        let service_role_key = service_role_key.trim();

        if base_url.is_empty() {
            return Err(LoadError::configuration("SUPABASE_URL is empty"));
        }
        if service_role_key.is_empty() {
            return Err(LoadError::configuration("SUPABASE_SERVICE_ROLE_KEY is empty"));
        }

        let parsed = url::Url::parse(base_url)
            .map_err(|e| LoadError::configuration(format!("SUPABASE_URL {:?} is not a URL: {}", base_url, e)))?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(LoadError::configuration(format!(
                "SUPABASE_URL must be http(s), got {}",
                parsed.scheme()
            )));
        }

        Ok(RemoteConfig {
            base_url: parsed,
            service_role_key: service_role_key.to_string(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Read the process environment
    pub fn from_env() -> Result<Self, LoadError> {
        let env = Environment::init_from_env()
            .map_err(|e| LoadError::configuration(e.to_string()))?;
        Self::from_environment(env)
    }

    /// Same as `from_env`, from an explicit map (tests, wrappers)
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, LoadError> {
        let env = Environment::init_from_hashmap(vars)
            .map_err(|e| LoadError::configuration(e.to_string()))?;
        Self::from_environment(env)
    }

    fn from_environment(env: Environment) -> Result<Self, LoadError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let url = non_empty(env.url)
            .or_else(|| non_empty(env.public_url))
            .ok_or_else(|| LoadError::configuration("SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL) is not set"))?;
        let key = non_empty(env.service_role_key)
            .ok_or_else(|| LoadError::configuration("SUPABASE_SERVICE_ROLE_KEY is not set"))?;

        Ok(Self::new(&url, &key)?.with_timeout(Duration::from_secs(env.http_timeout_secs)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    /// `<base>/rest/v1/` - table names are joined onto this
    pub fn rest_url(&self) -> url::Url {
        let mut url = self.base_url.clone();
        let path = format!("{}/rest/v1/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }

    pub fn service_role_key(&self) -> &str {
        &self.service_role_key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ============================================================================
// LOADER OPTIONS
// ============================================================================

/// What a run does; built by the CLI
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Delete everything (dependents, leaves, categories) before loading
    pub reset: bool,
    pub batch_size: usize,
    pub layout: TableLayout,
    /// Re-read leaves after the load and check every dataset record is present once
    pub verify: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            reset: false,
            batch_size: DEFAULT_BATCH_SIZE,
            layout: TableLayout::default(),
            verify: false,
        }
    }
}

impl LoaderOptions {
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.batch_size == 0 {
            return Err(LoadError::configuration("batch size must be at least 1"));
        }
        self.layout
            .validate()
            .map_err(|e| LoadError::configuration(format!("table layout: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_from_map_reads_credentials() {
        let config = RemoteConfig::from_map(&vars(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.base_url().as_str(), "https://abc.supabase.co/");
        assert_eq!(config.service_role_key(), "secret");
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_public_url_fallback() {
        let config = RemoteConfig::from_map(&vars(&[
            ("NEXT_PUBLIC_SUPABASE_URL", "https://public.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
            ("SEED_HTTP_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.base_url().host_str(), Some("public.supabase.co"));
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_or_empty_credentials_are_configuration_errors() {
        let missing_key = RemoteConfig::from_map(&vars(&[("SUPABASE_URL", "https://abc.supabase.co")]));
        assert!(matches!(missing_key, Err(LoadError::Configuration(_))));

        let empty_url = RemoteConfig::from_map(&vars(&[
            ("SUPABASE_URL", "  "),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
        ]));
        assert!(matches!(empty_url, Err(LoadError::Configuration(_))));

        let bad_url = RemoteConfig::new("not a url", "secret");
        assert!(matches!(bad_url, Err(LoadError::Configuration(_))));

        let bad_scheme = RemoteConfig::new("ftp://abc.supabase.co", "secret");
        assert!(matches!(bad_scheme, Err(LoadError::Configuration(_))));
    }

    #[test]
    fn test_rest_url() {
        let config = RemoteConfig::new("https://abc.supabase.co", "k").unwrap();
        assert_eq!(config.rest_url().as_str(), "https://abc.supabase.co/rest/v1/");

        let proxied = RemoteConfig::new("http://localhost:54321/api/", "k").unwrap();
        assert_eq!(proxied.rest_url().as_str(), "http://localhost:54321/api/rest/v1/");
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = RemoteConfig::new("https://abc.supabase.co", "super-secret").unwrap();
        let debug = format!("{:?}", config);

        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_options_validation() {
        assert!(LoaderOptions::default().validate().is_ok());

        let zero = LoaderOptions {
            batch_size: 0,
            ..LoaderOptions::default()
        };
        assert!(matches!(zero.validate(), Err(LoadError::Configuration(_))));
    }
}
