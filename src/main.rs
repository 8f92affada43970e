//! nio - connect to a peer, shout at it and echo what it says

use std::path::PathBuf;

use bytes::Bytes;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use nio::{
    Chain, Channel, ChannelConfig, Error, Result, Step, TlsConfig, TransportKind, UpperCase,
};

fn main() -> Result<()> {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Run 'nio --help' for usage");
            std::process::exit(2);
        }
    };

    if args.version {
        print_version();
        return Ok(());
    }

    // Initialize logging
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    // Load configuration
    let config = match &args.config {
        Some(path) => ChannelConfig::load(path)?,
        None => ChannelConfig::default(),
    };
    let tls = args.tls_config(&config);

    info!("nio v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, config, tls))?;

    info!("Goodbye!");
    Ok(())
}

async fn run(args: Args, config: ChannelConfig, tls: Option<TlsConfig>) -> Result<()> {
    let channel = Channel::connect_with(args.kind, &args.host, args.port, tls, config).await?;

    let writer = channel.writer(Chain::new().with(UpperCase).with_fn(print_data));
    let echo = move |data: Bytes, err: Option<Error>| {
        if err.is_some() {
            return Step::pass(data).with_error(err);
        }
        let mut reply = b"hello ".to_vec();
        reply.extend_from_slice(&data);
        if let Err(e) = writer.try_write(reply, print_written) {
            warn!("echo dropped: {}", e);
        }
        Step::pass(data)
    };

    let reader = channel.read(
        Chain::new()
            .with(UpperCase)
            .with_fn(print_data)
            .with_fn(echo),
    )?;

    channel.write(args.message.as_bytes(), print_written).await?;

    if let Err(e) = reader.await {
        error!("read loop panicked: {}", e);
    }
    channel.close().await
}

fn print_data(data: Bytes, err: Option<Error>) -> Step {
    if let Some(e) = err {
        if e.is_disconnect() {
            info!("peer went away: {}", e);
        } else {
            error!("{}", e);
        }
        return Step::pass(data).with_error(Some(e));
    }
    info!("{}", String::from_utf8_lossy(&data));
    Step::pass(data)
}

fn print_written(result: Result<usize>) {
    match result {
        Ok(n) => info!("{} bytes written", n),
        Err(e) if e.is_disconnect() => info!("write dropped, peer went away: {}", e),
        Err(e) => warn!("write failed: {}", e),
    }
}

/// Command line arguments
struct Args {
    host: String,
    port: u16,
    kind: TransportKind,
    tls: bool,
    insecure: bool,
    server_name: Option<String>,
    config: Option<PathBuf>,
    message: String,
    version: bool,
}

impl Args {
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut positional = Vec::new();
        let mut kind = TransportKind::Tcp;
        let mut tls = false;
        let mut insecure = false;
        let mut server_name = None;
        let mut config = None;
        let mut message = String::from("Hi");
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-k" | "--kind" => {
                    if i + 1 < args.len() {
                        kind = args[i + 1].parse()?;
                        i += 1;
                    }
                }
                "--server-name" => {
                    if i + 1 < args.len() {
                        server_name = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "-m" | "--message" => {
                    if i + 1 < args.len() {
                        message = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--tls" => tls = true,
                "--insecure" => insecure = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') => positional.push(arg.to_string()),
                other => return Err(Error::Config(format!("Unknown option: {}", other))),
            }
            i += 1;
        }

        let host = positional
            .first()
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        let port = match positional.get(1) {
            Some(port) => port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid port: {}", port)))?,
            None if kind == TransportKind::Unix => 0,
            None => 8080,
        };

        Ok(Self {
            host,
            port,
            kind,
            tls,
            insecure,
            server_name,
            config,
            message,
            version,
        })
    }

    /// TLS settings from the config file, switched on and adjusted by flags.
    fn tls_config(&self, config: &ChannelConfig) -> Option<TlsConfig> {
        let enabled = self.tls || self.insecure || self.server_name.is_some();
        let mut tls = match (&config.tls, enabled) {
            (Some(tls), _) => tls.clone(),
            (None, true) => TlsConfig::default(),
            (None, false) => return None,
        };
        if self.insecure {
            tls.allow_insecure = true;
        }
        if self.server_name.is_some() {
            tls.server_name = self.server_name.clone();
        }
        Some(tls)
    }
}

fn print_help() {
    println!(
        r#"nio - async duplex channel demo

USAGE:
    nio [OPTIONS] [HOST] [PORT]

ARGS:
    HOST                    Host name, IP address or unix socket path [default: localhost]
    PORT                    Port number [default: 8080]

OPTIONS:
    -k, --kind <KIND>       Transport kind: tcp, tcp4, tcp6, unix [default: tcp]
    --tls                   Wrap the connection in TLS
    --insecure              Skip certificate verification (implies --tls)
    --server-name <NAME>    Expected TLS peer name (implies --tls) [default: HOST]
    -c, --config <FILE>     Path to a JSON channel configuration
    -m, --message <TEXT>    First message to send [default: Hi]
    -v, --version           Print version information
    -h, --help              Print help information

Every payload received is uppercased, logged and echoed back
prefixed with "hello " through an uppercasing writer.

EXAMPLES:
    nio localhost 8080
    nio --tls --insecure example.com 443 -m "GET / HTTP/1.0\r\n\r\n"
    nio -k unix /tmp/echo.sock
    RUST_LOG=debug nio -c channel.json 127.0.0.1 9000
"#
    );
}

fn print_version() {
    println!("nio v{}", env!("CARGO_PKG_VERSION"));
    println!("Asynchronous duplex byte channel with read/write middleware chains");
}
