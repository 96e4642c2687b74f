use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Result, bail};

use crate::endpoint::{ANY_HOST, Endpoint};

const SOURCE_DEFAULT_HOST: &str = "localhost";

/// A validated invocation: `<source> to <target> [<ssl-key> <ssl-cert>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub source: Endpoint,
    pub target: Endpoint,
    pub ssl_key: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
}

/// Parse the process arguments, printing usage and exiting on any
/// violation. A usage exit is not an error exit.
pub fn parse_or_exit() -> CliArgs {
    let args: Vec<String> = env::args().collect();
    match parse(&args) {
        Ok(parsed) => parsed,
        Err(_) => {
            print_usage();
            process::exit(0);
        }
    }
}

/// Token-count rule: counting the program name itself, exactly 4, 6 or
/// 7 tokens are accepted. The key and cert paths come as a pair, so a
/// lone key path (5 tokens) is rejected, while one stray trailing
/// token (7) is tolerated and ignored.
fn parse(args: &[String]) -> Result<CliArgs> {
    if !matches!(args.len(), 4 | 6 | 7) {
        bail!("expected `<source> to <target> [<ssl-key> <ssl-cert>]`");
    }
    if !args[2].eq_ignore_ascii_case("to") {
        bail!("third argument must be the keyword `to`");
    }

    let source = Endpoint::parse(&args[1], SOURCE_DEFAULT_HOST)?;
    let target = Endpoint::parse(&args[3], ANY_HOST)?;

    let (ssl_key, ssl_cert) = if args.len() >= 6 {
        (Some(PathBuf::from(&args[4])), Some(PathBuf::from(&args[5])))
    } else {
        (None, None)
    };

    Ok(CliArgs {
        source,
        target,
        ssl_key,
        ssl_cert,
    })
}

fn print_usage() {
    let bin = env!("CARGO_PKG_NAME");
    println!("Usage:");
    println!("\t{bin} <SOURCE_TO_PROXY> to <PROXY_ENDPOINT> <OPTIONAL_SSL_PATH_TO_KEY> <OPTIONAL_SSL_PATH_TO_CERT>");
    println!();
    println!("\tBoth arguments can be a port number, or an address with port number with optional protocol.");
    println!("\tIf no address is specified in SOURCE_TO_PROXY, it defaults to localhost.");
    println!("\tIf no address is specified for PROXY_ENDPOINT or it's \"*\", it will listen on all network interfaces.");
    println!("\tIf you specify the address for PROXY_ENDPOINT (and not just port), it must be");
    println!("\tthe IP address of an existing network interface and cannot be a domain name.");
    println!();
    println!("Usage examples:");
    println!("\t{bin} 51123 to 3000");
    println!("\t{bin} 192.168.0.100:51123 to 10.0.0.1:3000");
    println!("\t{bin} [http(s)://]domain.com:80 to 3000");
    println!("\t{bin} [https://]ssl-domain.com:443 to [https://]192.168.1.1:3000");
    println!("\t{bin} [https://]ssl-domain.com:443 to [https://]192.168.1.1:3000 ssl/<name>.key ssl/<name>.cert");
    println!();
}
