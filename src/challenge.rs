use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Present,
    CleanUp,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Present => write!(f, "present"),
            Action::CleanUp => write!(f, "cleanup"),
        }
    }
}

/// A request to publish or remove the DNS-01 TXT record of one challenge, in cert-manager's wire shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default, rename = "type")]
    pub challenge_type: String,
    #[serde(rename = "dnsName")]
    pub dns_name: String,
    /// The raw, unquoted challenge value.
    pub key: String,
    #[serde(default)]
    pub resource_namespace: String,
    #[serde(rename = "resolvedFQDN")]
    pub resolved_fqdn: String,
    pub resolved_zone: String,
    #[serde(default)]
    pub allow_ambient_credentials: bool,
    /// Solver configuration, decoded into [`crate::config::ProviderConfig`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}
