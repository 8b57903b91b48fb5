//! Relay Configuration
//!
//! Loads configuration from environment variables. Missing or malformed values
//! are reported up front, naming the variable, rather than surfacing later as
//! failed requests.

use std::{
    env, fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use crate::{
    client::{AccessToken, Client, DeliveryPolicy},
    error::{Error, StoreError},
    generator::{Assistant, ChatCompletion, Completion, Inference, Provider},
    server::{AckMode, AppSecret},
    store::{MemoryStore, NoStore, Store},
};

/// A configuration problem, naming the offending variable.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Relay configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Token expected in `hub.verify_token` during subscription
    pub verify_token: String,

    /// Page access token for the Send API
    pub page_access_token: AccessToken,

    /// App secret for `X-Hub-Signature-256` validation (optional)
    pub app_secret: Option<AppSecret>,

    /// Listen address (default: 0.0.0.0)
    pub bind_address: IpAddr,

    /// Listen port (default: 3000)
    pub port: u16,

    /// Webhook path (default: /webhook)
    pub webhook_route: String,

    /// When the webhook acknowledges a batch (default: immediate)
    pub ack_mode: AckMode,

    /// Graph API version (default: v12.0)
    pub graph_api_version: String,

    /// Graph API host override
    pub graph_base_url: Option<String>,

    /// Per-request timeout for outbound HTTP (default: 10s)
    pub http_timeout: Duration,

    /// Send API attempts for transient failures (default: 3)
    pub delivery_max_attempts: u32,

    /// Upper bound on one reply generation (default: 10s)
    pub generation_timeout: Duration,

    pub generator: GeneratorConfig,

    pub store: StoreConfig,
}

/// Which text generator to call, and how.
#[derive(Clone)]
pub struct GeneratorConfig {
    pub provider: ProviderConfig,
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Provider-specific settings.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderConfig {
    Completion,
    Inference {
        model: String,
    },
    Chat {
        model: Option<String>,
        system_prompt: Option<String>,
    },
    Assistant {
        assistant_id: String,
        poll_interval: Duration,
        max_wait: Duration,
    },
}

/// Where conversation records go.
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreConfig {
    Memory,
    Postgres { database_url: String },
    None,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file is not read here; the binary loads it at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        Ok(Self {
            verify_token: vars.required("VERIFY_TOKEN")?,
            page_access_token: AccessToken(vars.required("PAGE_ACCESS_TOKEN")?),
            app_secret: vars.optional("APP_SECRET").map(AppSecret),
            bind_address: vars.parsed("BIND_ADDRESS", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: vars.parsed("PORT", 3000)?,
            webhook_route: vars
                .optional("WEBHOOK_ROUTE")
                .unwrap_or_else(|| "/webhook".into()),
            ack_mode: vars.parsed("ACK_MODE", AckMode::Immediate)?,
            graph_api_version: vars
                .optional("GRAPH_API_VERSION")
                .unwrap_or_else(|| "v12.0".into()),
            graph_base_url: vars.optional("GRAPH_BASE_URL"),
            http_timeout: Duration::from_secs(vars.positive("HTTP_TIMEOUT_SECS", 10)?),
            delivery_max_attempts: vars.positive("DELIVERY_MAX_ATTEMPTS", 3)?,
            generation_timeout: Duration::from_secs(vars.positive("GENERATION_TIMEOUT_SECS", 10)?),
            generator: GeneratorConfig::from_vars(&vars)?,
            store: StoreConfig::from_vars(&vars)?,
        })
    }

    /// The address the webhook server listens on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts: self.delivery_max_attempts,
            ..DeliveryPolicy::default()
        }
    }

    /// The Send API client described by this configuration.
    pub fn client(&self) -> Result<Client, Error> {
        let mut builder = Client::builder()
            .api_version(self.graph_api_version.as_str())
            .timeout(self.http_timeout)
            .policy(self.delivery_policy());
        if let Some(base_url) = &self.graph_base_url {
            builder = builder.base_url(base_url.as_str());
        }
        builder.build(self.page_access_token.clone())
    }

    /// An HTTP client for the text generator.
    pub fn generator_http(&self) -> Result<reqwest::Client, Error> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()?)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("webhook_route", &self.webhook_route)
            .field("ack_mode", &self.ack_mode)
            .field("verify_payload", &self.app_secret.is_some())
            .field("graph_api_version", &self.graph_api_version)
            .field("graph_base_url", &self.graph_base_url)
            .field("http_timeout", &self.http_timeout)
            .field("delivery_max_attempts", &self.delivery_max_attempts)
            .field("generation_timeout", &self.generation_timeout)
            .field("generator", &self.generator)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl GeneratorConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        let provider = match vars.optional("PROVIDER").as_deref() {
            None | Some("completion") => ProviderConfig::Completion,
            Some("inference") => ProviderConfig::Inference {
                model: vars.required("INFERENCE_MODEL")?,
            },
            Some("chat") => ProviderConfig::Chat {
                model: vars.optional("CHAT_MODEL"),
                system_prompt: vars.optional("SYSTEM_PROMPT"),
            },
            Some("assistant") => ProviderConfig::Assistant {
                assistant_id: vars.required("ASSISTANT_ID")?,
                poll_interval: Duration::from_millis(
                    vars.positive("ASSISTANT_POLL_INTERVAL_MS", 1000)?,
                ),
                max_wait: Duration::from_secs(vars.positive("ASSISTANT_MAX_WAIT_SECS", 5)?),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "PROVIDER",
                    value: other.to_owned(),
                    reason: "expected completion, inference, chat or assistant".into(),
                })
            }
        };

        Ok(Self {
            provider,
            api_key: vars.required("GENERATOR_API_KEY")?,
            base_url: vars.optional("GENERATOR_BASE_URL"),
        })
    }

    /// The generator described by this configuration.
    pub fn build(&self, http: reqwest::Client) -> Provider {
        let api_key = self.api_key.as_str();
        let base_url = self.base_url.as_deref();

        match &self.provider {
            ProviderConfig::Completion => {
                let mut provider = Completion::new(http, api_key);
                if let Some(base_url) = base_url {
                    provider = provider.base_url(base_url);
                }
                Provider::Completion(provider)
            }
            ProviderConfig::Inference { model } => {
                let mut provider = Inference::new(http, api_key, model.as_str());
                if let Some(base_url) = base_url {
                    provider = provider.base_url(base_url);
                }
                Provider::Inference(provider)
            }
            ProviderConfig::Chat {
                model,
                system_prompt,
            } => {
                let mut provider = ChatCompletion::new(http, api_key);
                if let Some(base_url) = base_url {
                    provider = provider.base_url(base_url);
                }
                if let Some(model) = model {
                    provider = provider.model(model.as_str());
                }
                if let Some(system_prompt) = system_prompt {
                    provider = provider.system_prompt(system_prompt.as_str());
                }
                Provider::Chat(provider)
            }
            ProviderConfig::Assistant {
                assistant_id,
                poll_interval,
                max_wait,
            } => {
                let mut provider = Assistant::new(http, api_key, assistant_id.as_str())
                    .poll_interval(*poll_interval)
                    .max_wait(*max_wait);
                if let Some(base_url) = base_url {
                    provider = provider.base_url(base_url);
                }
                Provider::Assistant(provider)
            }
        }
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<Self, ConfigError> {
        match vars.optional("STORE").as_deref() {
            None | Some("memory") => Ok(Self::Memory),
            Some("none") => Ok(Self::None),
            Some("postgres") if cfg!(feature = "postgres") => Ok(Self::Postgres {
                database_url: vars.required("DATABASE_URL")?,
            }),
            Some("postgres") => Err(ConfigError::Invalid {
                var: "STORE",
                value: "postgres".into(),
                reason: "built without the `postgres` feature".into(),
            }),
            Some(other) => Err(ConfigError::Invalid {
                var: "STORE",
                value: other.to_owned(),
                reason: "expected memory, postgres or none".into(),
            }),
        }
    }

    /// Opens the configured store.
    pub async fn open(&self) -> Result<Store, StoreError> {
        match self {
            Self::Memory => Ok(Store::Memory(MemoryStore::new())),
            #[cfg(feature = "postgres")]
            Self::Postgres { database_url } => {
                crate::store::PgStore::connect(database_url)
                    .await
                    .map(Store::Postgres)
            }
            #[cfg(not(feature = "postgres"))]
            Self::Postgres { .. } => Err(StoreError::Backend(
                "built without the `postgres` feature".into(),
            )),
            Self::None => Ok(Store::None(NoStore)),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            // the URL usually embeds a password
            Self::Postgres { .. } => f.write_str("Postgres"),
            Self::None => f.write_str("None"),
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
                var,
                reason: err.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default + fmt::Display,
        T::Err: fmt::Display,
    {
        let value = self.parsed(var, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(value)
    }
}
