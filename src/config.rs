use serde::{Deserialize, Serialize};

use std::{env, fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_verify_on_startup")]
    pub verify_on_startup: bool,
    #[serde(default)]
    pub sender: SenderConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    #[serde(default = "default_sender_name")]
    pub name: String,
    /// Falls back to the SMTP username when not set.
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Smtp(SmtpConfig),
    HttpApi(HttpApiConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_relay")]
    pub relay: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub tls: TlsMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Implicit TLS, usually port 465.
    #[default]
    Tls,
    Starttls,
    /// Plaintext, for local test relays only.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_api_service")]
    pub service: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            name: default_sender_name(),
            address: None,
        }
    }
}

impl Config {
    /// Address used in the `From` header of every relayed message.
    pub fn sender_address(&self) -> Option<String> {
        self.sender.address.clone().or_else(|| match &self.transport {
            TransportConfig::Smtp(smtp) => Some(smtp.username.clone()),
            TransportConfig::HttpApi(_) => None,
        })
    }
}

const fn default_port() -> u16 {
    3001
}

const fn default_verify_on_startup() -> bool {
    true
}

fn default_sender_name() -> String {
    "Email Relay".to_string()
}

fn default_smtp_relay() -> String {
    "smtp.gmail.com".to_string()
}

fn default_api_base_url() -> String {
    "https://api.brevo.com".to_string()
}

fn default_api_service() -> String {
    "brevo".to_string()
}

/// Flat view of the process environment, read with `envy`.
#[derive(Debug, Deserialize)]
struct EnvConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_verify_on_startup")]
    verify_on_startup: bool,
    #[serde(default = "default_transport_kind")]
    transport: String,
    #[serde(default = "default_sender_name")]
    sender_name: String,
    sender_address: Option<String>,
    email_user: Option<String>,
    email_pass: Option<String>,
    #[serde(default = "default_smtp_relay")]
    smtp_relay: String,
    smtp_port: Option<u16>,
    #[serde(default)]
    smtp_tls: TlsMode,
    api_key: Option<String>,
    #[serde(default = "default_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_api_service")]
    api_service: String,
}

fn default_transport_kind() -> String {
    "smtp".to_string()
}

impl TryFrom<EnvConfig> for Config {
    type Error = String;

    fn try_from(env: EnvConfig) -> Result<Self, Self::Error> {
        let transport = match env.transport.as_str() {
            "smtp" => TransportConfig::Smtp(SmtpConfig {
                relay: env.smtp_relay,
                port: env.smtp_port,
                username: env
                    .email_user
                    .ok_or("EMAIL_USER environment variable is required for the smtp transport")?,
                password: env
                    .email_pass
                    .ok_or("EMAIL_PASS environment variable is required for the smtp transport")?,
                tls: env.smtp_tls,
            }),
            "http_api" => TransportConfig::HttpApi(HttpApiConfig {
                base_url: env.api_base_url,
                api_key: env
                    .api_key
                    .ok_or("API_KEY environment variable is required for the http_api transport")?,
                service: env.api_service,
            }),
            other => {
                return Err(format!(
                    "Unknown TRANSPORT '{other}', expected 'smtp' or 'http_api'"
                ));
            }
        };

        Ok(Self {
            port: env.port,
            verify_on_startup: env.verify_on_startup,
            sender: SenderConfig {
                name: env.sender_name,
                address: env.sender_address,
            },
            transport,
        })
    }
}

/// Environment variables that take precedence over a config file.
#[derive(Debug, Deserialize)]
struct EnvOverrides {
    port: Option<u16>,
    sender_name: Option<String>,
    sender_address: Option<String>,
    email_user: Option<String>,
    email_pass: Option<String>,
    api_key: Option<String>,
}

impl Config {
    fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(name) = overrides.sender_name {
            self.sender.name = name;
        }
        if let Some(address) = overrides.sender_address {
            self.sender.address = Some(address);
        }

        match &mut self.transport {
            TransportConfig::Smtp(smtp) => {
                if let Some(username) = overrides.email_user {
                    smtp.username = username;
                }
                if let Some(password) = overrides.email_pass {
                    smtp.password = password;
                }
            }
            TransportConfig::HttpApi(api) => {
                if let Some(api_key) = overrides.api_key {
                    api.api_key = api_key;
                }
            }
        }
    }
}

fn config_from_vars<I>(vars: I) -> Result<Config, Box<dyn std::error::Error>>
where
    I: IntoIterator<Item = (String, String)>,
{
    let env_config: EnvConfig = envy::from_iter(vars)?;
    Config::try_from(env_config).map_err(Into::into)
}

fn load_from_file(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(Into::into)
}

/// Picks the first config file that exists.
fn locate_config_file(config_path: &str) -> Option<String> {
    // Try env path
    if Path::new(config_path).exists() {
        return Some(config_path.to_string());
    }

    // Fallback to config.yaml
    if Path::new("config.yaml").exists() {
        tracing::warn!(
            "Config file '{}' not found, falling back to 'config.yaml'",
            config_path
        );
        return Some("config.yaml".to_string());
    }

    // Fallback to config.example.yaml
    if Path::new("config.example.yaml").exists() {
        tracing::warn!(
            "Config file '{}' and 'config.yaml' not found, falling back to 'config.example.yaml'\
             \n This file should not be used and should be replaced with actual data",
            config_path
        );
        return Some("config.example.yaml".to_string());
    }

    None
}

pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    load_config_from(env::vars().collect())
}

fn load_config_from(vars: Vec<(String, String)>) -> Result<Config, Box<dyn std::error::Error>> {
    // Retrieve env variable
    let config_path = vars
        .iter()
        .find(|(key, _)| key == "EMAIL_RELAY_CONFIG")
        .map_or_else(|| "config.yaml".to_string(), |(_, value)| value.clone());

    if let Some(path) = locate_config_file(&config_path) {
        let mut config = load_from_file(&path)?;
        let overrides: EnvOverrides = envy::from_iter(vars)?;
        config.apply(overrides);
        tracing::info!("Loaded configuration from '{}' with environment overrides", path);
        return Ok(config);
    }

    // Fallback to environment variables
    tracing::info!(
        "No config file found, attempting to load configuration from environment variables"
    );
    match config_from_vars(vars) {
        Ok(config) => {
            tracing::info!("Successfully loaded configuration from environment variables");
            Ok(config)
        }
        Err(e) => Err(format!(
            "Config file not found and environment variables are incomplete. \
             Tried: '{config_path}', 'config.yaml', 'config.example.yaml', and environment variables. \
             Error: {e}"
        )
        .into()),
    }
}
