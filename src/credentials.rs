use crate::{
    config::ProviderConfig,
    error::{
        Result,
        SolverError,
    },
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Secret,
    SecretKeySelector,
};
use std::fmt;

/// An Open Telekom Cloud access/secret key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("could not fetch secret {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("could not get key {key} in secret {name}")]
    MissingKey { name: String, key: String },

    #[error("unable to decode key {key} in secret {name} as utf8 or base64")]
    Decode { name: String, key: String },
}

/// Read access to namespaced secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError>;
}

/// Looks up secrets through the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: kube::Client,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError> {
        trace!(%name, %namespace, %key, "secret lookup");
        let secret = kube::api::Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|err| SecretError::Fetch {
                name: name.to_string(),
                source: Box::new(err),
            })?;

        let value = secret_value(secret, name, key)?;
        debug!(%name, "fetched secret");
        Ok(value)
    }
}

fn secret_value(secret: Secret, name: &str, key: &str) -> Result<String, SecretError> {
    if let Some(value) = secret.string_data.and_then(|mut data| data.remove(key)) {
        return Ok(value);
    }

    let Some(bytes) = secret.data.and_then(|mut data| data.remove(key)) else {
        return Err(SecretError::MissingKey {
            name: name.to_string(),
            key: key.to_string(),
        });
    };

    if let Ok(decoded) = String::from_utf8(bytes.0.clone()) {
        return Ok(decoded);
    }

    use base64::prelude::*;
    BASE64_STANDARD
        .decode(&bytes.0)
        .ok()
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .ok_or_else(|| SecretError::Decode {
            name: name.to_string(),
            key: key.to_string(),
        })
}

/// Produces the key pair for a challenge.
///
/// A complete local pair always wins and the secret store is not consulted. Otherwise the access key and then the
/// secret key are read from the referenced secrets in `namespace`; the first failure aborts.
pub async fn resolve_credentials(
    local: Option<&Credentials>,
    config: &ProviderConfig,
    namespace: &str,
    secrets: Option<&dyn SecretStore>,
) -> Result<Credentials> {
    if let Some(credentials) = local {
        debug!("using ak/sk pair from env variables");
        return Ok(credentials.clone());
    }

    debug!("no ak/sk pair found in env variables, falling back to kubernetes secrets");

    let (Some(access_key_ref), Some(secret_key_ref)) = (&config.access_key_secret_ref, &config.secret_key_secret_ref)
    else {
        return Err(SolverError::CredentialResolution(
            "no ak/sk pair in env variables and no accessKeySecretRef/secretKeySecretRef configured".to_string(),
        ));
    };

    let Some(secrets) = secrets else {
        return Err(SolverError::CredentialResolution(
            "kubernetes client is not initialized".to_string(),
        ));
    };

    let access_key = lookup(secrets, namespace, access_key_ref).await?;
    let secret_key = lookup(secrets, namespace, secret_key_ref).await?;

    Ok(Credentials::new(access_key, secret_key))
}

async fn lookup(secrets: &dyn SecretStore, namespace: &str, selector: &SecretKeySelector) -> Result<String> {
    Ok(secrets.get(namespace, &selector.name, &selector.key).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::{
        collections::BTreeMap,
        sync::Mutex,
    };

    #[derive(Default)]
    struct RecordingStore {
        values: BTreeMap<(String, String), String>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingStore {
        fn with(mut self, name: &str, key: &str, value: &str) -> Self {
            self.values.insert((name.to_string(), key.to_string()), value.to_string());
            self
        }
    }

    #[async_trait]
    impl SecretStore for RecordingStore {
        async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError> {
            self.calls
                .lock()
                .unwrap()
                .push((namespace.to_string(), name.to_string(), key.to_string()));
            self.values
                .get(&(name.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| SecretError::MissingKey {
                    name: name.to_string(),
                    key: key.to_string(),
                })
        }
    }

    fn selector(name: &str, key: &str) -> SecretKeySelector {
        SecretKeySelector {
            name: name.to_string(),
            key: key.to_string(),
            optional: None,
        }
    }

    fn config_with_refs() -> ProviderConfig {
        ProviderConfig {
            region: "eu-de".to_string(),
            access_key_secret_ref: Some(selector("otc", "ak")),
            secret_key_secret_ref: Some(selector("otc", "sk")),
        }
    }

    #[tokio::test]
    async fn local_pair_skips_secret_store() {
        let store = RecordingStore::default();
        let local = Credentials::new("local-ak", "local-sk");

        let creds = resolve_credentials(Some(&local), &config_with_refs(), "cert-manager", Some(&store))
            .await
            .unwrap();

        assert_eq!(creds, local);
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn secrets_are_read_access_key_first() {
        let store = RecordingStore::default()
            .with("otc", "ak", "remote-ak")
            .with("otc", "sk", "remote-sk");

        let creds = resolve_credentials(None, &config_with_refs(), "cert-manager", Some(&store))
            .await
            .unwrap();

        assert_eq!(creds, Credentials::new("remote-ak", "remote-sk"));
        let calls = store.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("cert-manager".to_string(), "otc".to_string(), "ak".to_string()),
                ("cert-manager".to_string(), "otc".to_string(), "sk".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_access_key_aborts_before_secret_key() {
        let store = RecordingStore::default().with("otc", "sk", "remote-sk");

        let err = resolve_credentials(None, &config_with_refs(), "cert-manager", Some(&store))
            .await
            .unwrap_err();

        assert!(matches!(err, SolverError::SecretLookup(SecretError::MissingKey { .. })));
        assert_eq!(store.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_source_is_a_resolution_error() {
        let store = RecordingStore::default();
        let err = resolve_credentials(None, &ProviderConfig::default(), "default", Some(&store))
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::CredentialResolution(_)));

        let err = resolve_credentials(None, &config_with_refs(), "default", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::CredentialResolution(_)));
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let printed = format!("{:?}", Credentials::new("AKIDEXAMPLE", "very-secret"));
        assert!(!printed.contains("AKIDEXAMPLE"));
        assert!(!printed.contains("very-secret"));
    }

    #[test]
    fn secret_value_prefers_plain_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([("ak".to_string(), ByteString(b"plain".to_vec()))])),
            ..Default::default()
        };
        assert_eq!(secret_value(secret, "otc", "ak").unwrap(), "plain");

        let secret = Secret {
            data: Some(BTreeMap::from([("ak".to_string(), ByteString(b"plain".to_vec()))])),
            ..Default::default()
        };
        assert!(matches!(
            secret_value(secret, "otc", "sk"),
            Err(SecretError::MissingKey { .. })
        ));
    }
}
