use crate::{
    challenge::ChallengeRequest,
    config::{
        self,
        ProviderConfig,
    },
    credentials::{
        resolve_credentials,
        Credentials,
        KubeSecretStore,
        SecretStore,
    },
    dns::{
        all_record_sets,
        all_zones,
        same_name,
        ClientFactory,
        CreateRecordSet,
        DnsApi,
        ListRecordSetsOpts,
        ListZonesOpts,
        RecordSet,
        UpdateRecordSet,
        Zone,
        TXT_RECORD_SET_TYPE,
    },
    error::{
        CancelReason,
        Result,
        SolverError,
        Stage,
    },
    quote::quote,
    SOLVER_NAME,
};
use async_trait::async_trait;
use std::{
    future::Future,
    sync::Arc,
};
use tokio::sync::{
    OnceCell,
    RwLock,
};
use tokio_util::sync::CancellationToken;

/// What a challenge-orchestration host needs from a DNS-01 provider.
///
/// `present` must tolerate being called repeatedly with the same request, and `clean_up` must only remove the
/// record carrying the request's key so that several validations for one name can run side by side.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Unique within the webhook's API group.
    fn name(&self) -> &str;

    async fn present(&self, challenge: &ChallengeRequest) -> Result<()>;

    async fn clean_up(&self, challenge: &ChallengeRequest) -> Result<()>;

    /// Called once when the webhook starts. Builds the Kubernetes client used to read credential secrets.
    async fn initialize(&self, kube_config: kube::Config, stop: CancellationToken) -> Result<()>;
}

/// Publishes challenge records in Open Telekom Cloud DNS.
pub struct OtcSolver {
    context: CancellationToken,
    name: String,
    factory: Arc<dyn ClientFactory>,
    local_credentials: Option<Credentials>,
    secrets: RwLock<Option<Arc<dyn SecretStore>>>,
    /// Built on first use and kept for the lifetime of the solver.
    dns: OnceCell<Arc<dyn DnsApi>>,
}

impl OtcSolver {
    /// Creates a solver that picks up a local key pair from `OS_ACCESS_KEY` / `OS_SECRET_KEY` if present.
    pub fn new(context: CancellationToken, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            context,
            name: SOLVER_NAME.to_string(),
            factory,
            local_credentials: config::local_credentials(),
            secrets: RwLock::new(None),
            dns: OnceCell::new(),
        }
    }

    pub fn with_local_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.local_credentials = credentials;
        self
    }

    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = RwLock::new(Some(secrets));
        self
    }

    async fn dns_client(&self, challenge: &ChallengeRequest) -> Result<Arc<dyn DnsApi>> {
        self.dns
            .get_or_try_init(|| async {
                let config = ProviderConfig::from_value(challenge.config.as_ref())?;
                debug!("loaded challenge-request config");
                let region = config.region()?;

                let secrets = self.secrets.read().await.clone();
                let credentials = resolve_credentials(
                    self.local_credentials.as_ref(),
                    &config,
                    &challenge.resource_namespace,
                    secrets.as_deref(),
                )
                .await?;

                self.factory
                    .connect(&credentials, region)
                    .await
                    .map_err(SolverError::ClientConstruction)
            })
            .await
            .cloned()
    }

    /// Abandons `work` at its next await point once the solver's context is cancelled.
    async fn until_cancelled<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.context.cancelled() => Err(SolverError::Cancelled(CancelReason::Context)),
            res = work => res,
        }
    }

    async fn reconcile_present(&self, challenge: &ChallengeRequest) -> Result<()> {
        let api = self.dns_client(challenge).await?;
        let api = api.as_ref();
        let zone = resolve_zone(api, &challenge.resolved_zone).await?;
        let fqdn = &challenge.resolved_fqdn;
        let value = quote(&challenge.key);

        let mut record_sets = find_txt_records(api, &zone, fqdn, &value).await?;
        if record_sets.is_empty() {
            // Only one TXT record set may exist per name, a stale value gets overwritten.
            record_sets = find_txt_records_by_name(api, &zone, fqdn).await?;
        }

        match first_match(record_sets, fqdn) {
            Some(record_set) => {
                let opts = UpdateRecordSet {
                    records: vec![value],
                    ttl: None,
                };
                api.update_record_set(&zone.id, &record_set.id, &opts)
                    .await
                    .map_err(SolverError::record_set("updating record set"))?;
            }
            None => {
                let opts = CreateRecordSet {
                    name: fqdn.clone(),
                    record_type: TXT_RECORD_SET_TYPE.to_string(),
                    records: vec![value],
                    ttl: None,
                    description: Some(format!("ACME DNS-01 challenge for {}", challenge.dns_name)),
                };
                api.create_record_set(&zone.id, &opts)
                    .await
                    .map_err(SolverError::record_set("creating record set"))?;
            }
        }

        Ok(())
    }

    async fn reconcile_clean_up(&self, challenge: &ChallengeRequest) -> Result<()> {
        let api = self.dns_client(challenge).await?;
        let api = api.as_ref();
        let zone = resolve_zone(api, &challenge.resolved_zone).await?;
        let fqdn = &challenge.resolved_fqdn;
        let value = quote(&challenge.key);

        let record_sets = find_txt_records(api, &zone, fqdn, &value).await?;
        let Some(record_set) = first_match(record_sets, fqdn) else {
            debug!(
                "clean up skipped: found 0 recordsets matching {fqdn} in zone {}",
                challenge.resolved_zone
            );
            return Ok(());
        };

        api.delete_record_set(&zone.id, &record_set.id)
            .await
            .map_err(SolverError::record_set("deleting record set"))
    }
}

#[async_trait]
impl Solver for OtcSolver {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip_all, fields(uid = %challenge.uid))]
    async fn present(&self, challenge: &ChallengeRequest) -> Result<()> {
        debug!(
            dns_name = %challenge.dns_name,
            zone = %challenge.resolved_zone,
            fqdn = %challenge.resolved_fqdn,
            "starting challenge request 'present'"
        );
        self.until_cancelled(self.reconcile_present(challenge))
            .await
            .map_err(|err| err.within(Stage::Present))?;
        debug!(
            dns_name = %challenge.dns_name,
            zone = %challenge.resolved_zone,
            fqdn = %challenge.resolved_fqdn,
            "completed challenge request 'present'"
        );
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(uid = %challenge.uid))]
    async fn clean_up(&self, challenge: &ChallengeRequest) -> Result<()> {
        debug!(
            zone = %challenge.resolved_zone,
            fqdn = %challenge.resolved_fqdn,
            "starting challenge request 'cleanup'"
        );
        self.until_cancelled(self.reconcile_clean_up(challenge))
            .await
            .map_err(|err| err.within(Stage::CleanUp))?;
        debug!(
            zone = %challenge.resolved_zone,
            fqdn = %challenge.resolved_fqdn,
            "completed challenge request 'cleanup'"
        );
        Ok(())
    }

    async fn initialize(&self, kube_config: kube::Config, stop: CancellationToken) -> Result<()> {
        debug!("initializing cert-manager-webhook-{SOLVER_NAME}");

        if self.context.is_cancelled() {
            return Err(SolverError::Cancelled(CancelReason::Context).within(Stage::Initialize));
        }
        if stop.is_cancelled() {
            return Err(SolverError::Cancelled(CancelReason::StopSignal).within(Stage::Initialize));
        }

        let client = kube::Client::try_from(kube_config)
            .map_err(|err| SolverError::ClusterClient(err).within(Stage::Initialize))?;
        *self.secrets.write().await = Some(Arc::new(KubeSecretStore::new(client)));

        debug!("initialized cert-manager-webhook-{SOLVER_NAME}");
        Ok(())
    }
}

/// Looks up the zone called `zone_name`. Anything but exactly one match is an error.
pub async fn resolve_zone(api: &dyn DnsApi, zone_name: &str) -> Result<Zone> {
    let opts = ListZonesOpts {
        name: Some(zone_name.to_string()),
    };
    let mut zones: Vec<Zone> = all_zones(api, &opts)
        .await
        .map_err(SolverError::record_set("listing zones"))?
        .into_iter()
        .filter(|zone| same_name(&zone.name, zone_name))
        .collect();

    if zones.len() != 1 {
        return Err(SolverError::AmbiguousZone {
            zone: zone_name.to_string(),
            count: zones.len(),
        });
    }

    Ok(zones.remove(0))
}

/// TXT record sets named `fqdn` that contain `quoted_value`. Finding none is not an error.
pub async fn find_txt_records(api: &dyn DnsApi, zone: &Zone, fqdn: &str, quoted_value: &str) -> Result<Vec<RecordSet>> {
    let opts = ListRecordSetsOpts {
        name: Some(fqdn.to_string()),
        record_type: Some(TXT_RECORD_SET_TYPE.to_string()),
        records: Some(quoted_value.to_string()),
    };
    let record_sets = list_txt_records(api, zone, fqdn, &opts).await?;
    Ok(record_sets
        .into_iter()
        .filter(|record_set| record_set.records.iter().any(|record| record == quoted_value))
        .collect())
}

/// TXT record sets named `fqdn`, whatever their value.
pub async fn find_txt_records_by_name(api: &dyn DnsApi, zone: &Zone, fqdn: &str) -> Result<Vec<RecordSet>> {
    let opts = ListRecordSetsOpts {
        name: Some(fqdn.to_string()),
        record_type: Some(TXT_RECORD_SET_TYPE.to_string()),
        records: None,
    };
    list_txt_records(api, zone, fqdn, &opts).await
}

async fn list_txt_records(
    api: &dyn DnsApi,
    zone: &Zone,
    fqdn: &str,
    opts: &ListRecordSetsOpts,
) -> Result<Vec<RecordSet>> {
    let record_sets = all_record_sets(api, &zone.id, opts)
        .await
        .map_err(SolverError::record_set("listing record sets"))?;
    Ok(record_sets
        .into_iter()
        .filter(|record_set| record_set.record_type.eq_ignore_ascii_case(TXT_RECORD_SET_TYPE))
        .filter(|record_set| same_name(&record_set.name, fqdn))
        .collect())
}

fn first_match(record_sets: Vec<RecordSet>, fqdn: &str) -> Option<RecordSet> {
    let mut record_sets = record_sets.into_iter();
    let first = record_sets.next()?;
    let ignored: Vec<String> = record_sets.map(|record_set| record_set.id).collect();
    if !ignored.is_empty() {
        warn!(%fqdn, using = %first.id, ?ignored, "found more than one matching TXT record set");
    }
    Some(first)
}
