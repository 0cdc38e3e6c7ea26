#[macro_use]
extern crate tracing;

use clap::Parser;
use eyre::{
    OptionExt as _,
    Result,
    WrapErr as _,
};
use opentelekomcloud_dns_solver::{
    challenge::{
        Action,
        ChallengeRequest,
    },
    config::{
        self,
        ProviderConfig,
    },
    dns::{
        self,
        lookup,
        otc::OtcClientFactory,
    },
    quote::quote,
    solver::{
        OtcSolver,
        Solver as _,
    },
};
use std::{
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// As defined in sysexits.h
const EXIT_CODE_CONFIGURATION_ERROR: u8 = 78;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[clap(long, env = "GROUP_NAME", default_value = "acme.opentelekomcloud.com", help = "API group of the webhook")]
    group_name: String,

    #[clap(long, env = "OS_DEBUG", help = "Log at debug level unless RUST_LOG is set")]
    debug: bool,

    #[clap(
        long,
        env = "OTC_REQUEST_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration,
        help = "Timeout for requests against the Open Telekom Cloud API"
    )]
    timeout: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Publish the TXT record of a challenge
    Present(ChallengeArgs),
    /// Remove the TXT record of a challenge
    CleanUp(ChallengeArgs),
    /// List the public zones visible with the local key pair
    ListZones(ListZonesArgs),
    /// Print a randomly chosen authoritative nameserver
    Nameserver,
    /// Query the TXT records an authoritative nameserver serves for a name
    Check(CheckArgs),
    /// Print the JSON schema of the solver config
    ConfigSchema,
}

#[derive(clap::Args)]
struct ChallengeArgs {
    #[clap(long, help = "JSON file holding a ChallengeRequest", conflicts_with_all = ["fqdn", "zone", "key"])]
    request: Option<PathBuf>,

    #[clap(long, help = "Fully qualified record name, e.g. _acme-challenge.example.com.")]
    fqdn: Option<String>,

    #[clap(long, help = "Zone the record lives in, e.g. example.com.")]
    zone: Option<String>,

    #[clap(long, help = "Challenge key")]
    key: Option<String>,

    #[clap(long, default_value = "default", help = "Namespace of the referenced secrets")]
    namespace: String,

    #[clap(long, env = "OS_REGION", help = "Region, used when no solver config is given")]
    region: Option<String>,

    #[clap(long, help = "Solver config as JSON")]
    config: Option<String>,
}

#[derive(clap::Args)]
struct ListZonesArgs {
    #[clap(long, env = "OS_REGION", default_value = "eu-de")]
    region: String,

    #[clap(long, help = "Only zones with this name")]
    name: Option<String>,
}

#[derive(clap::Args)]
struct CheckArgs {
    #[clap(help = "Fully qualified record name")]
    fqdn: String,

    #[clap(long, help = "Wait until this (unquoted) value is served")]
    value: Option<String>,

    #[clap(long, help = "Nameserver and port, a random authoritative one if not set")]
    nameserver: Option<SocketAddr>,

    #[clap(long, value_parser = humantime::parse_duration, help = "Give up waiting after this long")]
    max_wait: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            return Ok(ExitCode::from(EXIT_CODE_CONFIGURATION_ERROR));
        }
        Err(err) => {
            err.print()?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    init_tracing(cli.debug);
    debug!(group_name = %cli.group_name, "starting");

    let context = CancellationToken::new();
    let shutdown = context.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    match cli.command {
        Command::Present(args) => run_challenge(Action::Present, args, cli.timeout, context).await?,
        Command::CleanUp(args) => run_challenge(Action::CleanUp, args, cli.timeout, context).await?,
        Command::ListZones(args) => list_zones(args, cli.timeout).await?,
        Command::Nameserver => println!("{}", dns::random_nameserver()),
        Command::Check(args) => check(args).await?,
        Command::ConfigSchema => {
            let schema = schemars::schema_for!(ProviderConfig);
            print!("{}", serde_yaml::to_string(&schema)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn challenge_request(action: Action, args: ChallengeArgs) -> Result<ChallengeRequest> {
    if let Some(path) = args.request {
        let raw = tokio::fs::read(&path)
            .await
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let mut request: ChallengeRequest = serde_json::from_slice(&raw).wrap_err("invalid challenge request")?;
        request.action = action;
        return Ok(request);
    }

    let fqdn = args.fqdn.ok_or_eyre("--fqdn or --request is required")?;
    let zone = args.zone.ok_or_eyre("--zone or --request is required")?;
    let key = args.key.ok_or_eyre("--key or --request is required")?;

    let config = match (args.config, args.region) {
        (Some(config), _) => Some(serde_json::from_str(&config).wrap_err("invalid --config")?),
        (None, Some(region)) => Some(serde_json::json!({ "region": region })),
        (None, None) => None,
    };

    Ok(ChallengeRequest {
        action,
        challenge_type: "dns-01".to_string(),
        dns_name: fqdn.trim_start_matches("_acme-challenge.").trim_end_matches('.').to_string(),
        key,
        resource_namespace: args.namespace,
        resolved_fqdn: fqdn,
        resolved_zone: zone,
        config,
        ..Default::default()
    })
}

async fn run_challenge(action: Action, args: ChallengeArgs, timeout: Duration, context: CancellationToken) -> Result<()> {
    let request = challenge_request(action, args).await?;
    let factory = OtcClientFactory::new(timeout)?;
    let solver = OtcSolver::new(context.clone(), Arc::new(factory));

    if config::local_credentials().is_none() {
        match kube::Config::infer().await {
            Ok(kube_config) => solver.initialize(kube_config, context.child_token()).await?,
            Err(err) => warn!("no kubernetes config available, secret references cannot be resolved: {err}"),
        }
    }

    match action {
        Action::Present => solver.present(&request).await?,
        Action::CleanUp => solver.clean_up(&request).await?,
    }

    info!(fqdn = %request.resolved_fqdn, value = %quote(&request.key), "{action} done");
    Ok(())
}

async fn list_zones(args: ListZonesArgs, timeout: Duration) -> Result<()> {
    let credentials =
        config::local_credentials().ok_or_eyre("OS_ACCESS_KEY and OS_SECRET_KEY must be set to list zones")?;
    let factory = OtcClientFactory::new(timeout)?;
    let api = dns::ClientFactory::connect(&factory, &credentials, &args.region).await?;

    let zones = dns::all_zones(api.as_ref(), &dns::ListZonesOpts { name: args.name }).await?;
    println!("{}", serde_json::to_string_pretty(&zones)?);
    Ok(())
}

async fn check(args: CheckArgs) -> Result<()> {
    let nameserver = match args.nameserver {
        Some(nameserver) => nameserver,
        None => lookup::authoritative_nameserver()?,
    };

    match args.value {
        Some(value) => {
            lookup::wait_for_txt_record(&args.fqdn, &value, nameserver, args.max_wait, Duration::from_secs(5)).await?;
        }
        None => {
            for value in lookup::txt_records(&args.fqdn, nameserver).await? {
                println!("{value}");
            }
        }
    }
    Ok(())
}
