use crate::credentials::Credentials;
use k8s_openapi::api::core::v1::SecretKeySelector;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

pub const ACCESS_KEY_ENV: &str = "OS_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "OS_SECRET_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error decoding solver config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("region is required")]
    MissingRegion,
}

/// Per-issuer solver configuration, set by users in
/// `issuer.spec.acme.dns01.providers.webhook.config`.
///
/// Credentials are never part of it; they are referenced through secrets in the challenge's namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Open Telekom Cloud region, e.g. eu-de
    #[serde(default)]
    pub region: String,
    /// Secret holding the access key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_secret_ref: Option<SecretKeySelector>,
    /// Secret holding the secret key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_secret_ref: Option<SecretKeySelector>,
}

impl ProviderConfig {
    /// Decodes raw JSON bytes. Missing or empty input yields the default config.
    pub fn decode(raw: Option<&[u8]>) -> Result<Self, ConfigError> {
        match raw {
            None => Ok(Self::default()),
            Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Self::default()),
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// Same as [`ProviderConfig::decode`] for a payload that was already parsed as part of a challenge request.
    pub fn from_value(value: Option<&Value>) -> Result<Self, ConfigError> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Ok(Self::deserialize(value)?),
        }
    }

    pub fn region(&self) -> Result<&str, ConfigError> {
        match self.region.trim() {
            "" => Err(ConfigError::MissingRegion),
            region => Ok(region),
        }
    }
}

/// Reads the access/secret key pair from `OS_ACCESS_KEY` and `OS_SECRET_KEY`.
///
/// Returns `None` unless both are set and non-empty.
pub fn local_credentials() -> Option<Credentials> {
    local_credentials_from(|name| std::env::var(name).ok())
}

pub(crate) fn local_credentials_from(lookup: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
    let access_key = lookup(ACCESS_KEY_ENV).filter(|it| !it.is_empty())?;
    let secret_key = lookup(SECRET_KEY_ENV).filter(|it| !it.is_empty())?;
    Some(Credentials::new(access_key, secret_key))
}
