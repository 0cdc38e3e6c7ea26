//! Out-of-band verification: asks an authoritative nameserver which TXT values it serves for a name.

use super::random_nameserver;
use eyre::{
    bail,
    Result,
};
use rsdns::{
    clients::{
        tokio::Client,
        ClientConfig,
    },
    records::{
        data::Txt,
        Class,
    },
};
use std::{
    net::{
        IpAddr,
        SocketAddr,
    },
    time::Duration,
};
use tokio::time::sleep;

pub const DNS_PORT: u16 = 53;

/// Socket address of a randomly selected authoritative nameserver.
pub fn authoritative_nameserver() -> Result<SocketAddr> {
    let ip: IpAddr = random_nameserver().parse()?;
    Ok(SocketAddr::new(ip, DNS_PORT))
}

pub async fn txt_records(qname: &str, nameserver: SocketAddr) -> Result<Vec<String>> {
    debug!(?qname, %nameserver, "TXT record lookup...");
    let config = ClientConfig::with_nameserver(nameserver);
    let mut client = Client::new(config).await?;
    let rrset = client.query_rrset::<Txt>(qname, Class::IN).await?;
    Ok(rrset
        .rdata
        .iter()
        .map(|txt| String::from_utf8_lossy(&txt.text).to_string())
        .collect())
}

/// Polls until `nameserver` serves `value` for `qname`, or `max_wait` elapses.
pub async fn wait_for_txt_record(
    qname: &str,
    value: &str,
    nameserver: SocketAddr,
    max_wait: Option<Duration>,
    step: Duration,
) -> Result<()> {
    let start = std::time::Instant::now();

    loop {
        match txt_records(qname, nameserver).await {
            Ok(values) if values.iter().any(|it| it == value) => {
                info!("TXT record for {qname:?} is served by {nameserver}");
                return Ok(());
            }
            Ok(values) => debug!(?values, "TXT record not served yet"),
            Err(err) => warn!("Failed to resolve TXT record: {err}"),
        }

        if let Some(max_wait) = max_wait {
            if start.elapsed() > max_wait {
                bail!("TXT record for {qname:?} not served by {nameserver} after {max_wait:?}");
            }
        }

        sleep(step).await;
    }
}
