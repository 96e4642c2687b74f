mod cli;
mod endpoint;
mod interfaces;
mod proxy;
mod tls;

use anyhow::Result;
use log::{LevelFilter, info};

use crate::endpoint::Protocol;
use crate::tls::CertificateBundle;

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::env_logger::builder()
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .init();

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    let args = cli::parse_or_exit();

    info!("Proxying {} to network interfaces:", args.source);
    let ifaces = interfaces::collect();
    for iface in interfaces::matching(&ifaces, &args.target.host) {
        info!(
            "\t{}: {}://{}:{}",
            iface.name, args.target.protocol, iface.addr, args.target.port
        );
    }

    let ssl = if args.target.protocol == Protocol::Https {
        Some(match (&args.ssl_key, &args.ssl_cert) {
            (Some(key), Some(cert)) => {
                info!("Using user SSL certificate");
                CertificateBundle::from_files(key, cert)?
            }
            _ => {
                info!("Generating self-signed certificate");
                CertificateBundle::self_signed(&args.target.host)?
            }
        })
    } else {
        None
    };

    proxy::run(args.source, args.target, ssl).await
}
