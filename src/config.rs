use serde::{Deserialize, Serialize};

/// Process-wide configuration, loaded once at startup and never mutated.
/// Reload (SIGHUP) replaces the whole snapshot via `ArcSwap`, it never
/// patches fields in place.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstreams: UpstreamsConfig,
    pub anti_truncation: AntiTruncationConfig,
    pub proxy: ProxyConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
    pub max_body_size_mb: u64,
}

/// One base URL per dialect. No instance pooling, no load balancing:
/// each dialect endpoint talks to exactly one upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamsConfig {
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub claude_base_url: String,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AntiTruncationConfig {
    pub enabled_default: bool,
    pub model_prefix: String,
    pub marker: String,
    pub max_attempts: u32,
    pub keepalive_interval_seconds: f64,
    pub upstream_idle_timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub trust_proxy_headers: bool,
    pub trusted_proxy_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            max_body_size_mb: 50,
        }
    }
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            claude_base_url: "https://api.anthropic.com".to_string(),
            connect_timeout_seconds: 10,
            request_timeout_seconds: 60,
        }
    }
}

impl Default for AntiTruncationConfig {
    fn default() -> Self {
        Self {
            enabled_default: false,
            model_prefix: "anti-truncation/".to_string(),
            marker: "[done]".to_string(),
            max_attempts: 3,
            keepalive_interval_seconds: 15.0,
            upstream_idle_timeout_seconds: 45.0,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            trust_proxy_headers: true,
            trusted_proxy_cidrs: vec![
                "127.0.0.0/8".to_string(),
                "::1/128".to_string(),
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstreams: UpstreamsConfig::default(),
            anti_truncation: AntiTruncationConfig::default(),
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Load configuration from `config.toml` (if present) layered with
/// `PROXY__`-prefixed environment variables, e.g.
/// `PROXY__ANTI_TRUNCATION__MAX_ATTEMPTS=5`. Defaults fill in anything
/// neither source sets.
pub fn load_config() -> anyhow::Result<Config> {
    let defaults = toml::to_string(&Config::default())?;

    let cfg: Config = config::Config::builder()
        .add_source(config::File::from_str(&defaults, config::FileFormat::Toml))
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::with_prefix("PROXY").separator("__"))
        .build()?
        .try_deserialize()?;

    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.upstreams.openai_base_url.is_empty()
        || cfg.upstreams.gemini_base_url.is_empty()
        || cfg.upstreams.claude_base_url.is_empty()
    {
        anyhow::bail!("all three upstream base URLs must be non-empty");
    }

    if cfg.anti_truncation.marker.is_empty() {
        anyhow::bail!("anti_truncation.marker must be non-empty");
    }

    if cfg.anti_truncation.max_attempts == 0 {
        anyhow::bail!("anti_truncation.max_attempts must be at least 1");
    }

    for cidr in &cfg.proxy.trusted_proxy_cidrs {
        if cidr.parse::<ipnet::IpNet>().is_err() {
            anyhow::bail!("invalid trusted proxy CIDR: {}", cidr);
        }
    }

    Ok(())
}
