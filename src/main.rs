mod config;
mod diagnostics;
mod dns_relay;
mod error;
mod forward;
mod geo;
mod html_rewrite;
mod mirrors;
mod profiles;

use std::error::Error;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use clap::Parser;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, HOST, HeaderValue, SERVER, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
#[cfg(feature = "tls_rustls")]
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
#[cfg(all(feature = "tls_default", not(feature = "tls_rustls")))]
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{LevelFilter, debug, error, info, trace, warn};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::error::ProxyError;
use crate::forward::{
    build_outbound_headers, forward_upstream, host_only, is_tooling_client, rewrite_redirect,
    target_uri,
};
use crate::geo::GeoAttributes;
use crate::html_rewrite::{HtmlRewriteBody, RewritePlan, is_rewritable_html};
use crate::mirrors::select_mirror;
use crate::profiles::Profile;

pub(crate) type ProxyBody = BoxBody<bytes::Bytes, ProxyError>;

pub(crate) type Client = hyper_util::client::legacy::Client<
    hyper_timeout::TimeoutConnector<HttpsConnector<HttpConnector>>,
    ProxyBody,
>;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

const ACCESS_DENIED_BODY: &str = "Access denied. Invalid path.";

#[must_use]
fn full<T: Into<bytes::Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

#[must_use]
pub(crate) fn quick_response<T: Into<bytes::Bytes>>(
    status: StatusCode,
    message: T,
) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(SERVER, HeaderValue::from_static(APP_NAME))
        .body(full(message))
        .expect("Response is valid")
}

/// The three collaborator routes are dispatched ahead of the mirror
/// pipeline; everything else runs through the access guard.
async fn route_request(
    client: SocketAddr,
    req: Request<Incoming>,
    https_client: Client,
) -> Response<ProxyBody> {
    trace!("Incoming request: {req:?}");

    match req.uri().path() {
        "/dns-query" => dns_relay::serve_dns_query(req, &https_client).await,
        "/ip" => diagnostics::serve_ip_echo(req.headers(), client),
        "/ua" => diagnostics::serve_ua_echo(req.headers()),
        _ => proxy_request(client, req, https_client, global_profile()).await,
    }
}

async fn proxy_request(
    client: SocketAddr,
    req: Request<Incoming>,
    https_client: Client,
    profile: &'static Profile,
) -> Response<ProxyBody> {
    let path = req.uri().path().to_owned();

    if !profile.paths.allows(&path) {
        info!(
            "Denied request for path `{path}` from client {}",
            client.ip().to_canonical()
        );
        return quick_response(StatusCode::FORBIDDEN, ACCESS_DENIED_BODY);
    }

    let geo = GeoAttributes::from_headers(req.headers());
    let mirror_host = select_mirror(profile.rules, profile.fallback, geo);

    let client_authority = req
        .headers()
        .get(HOST)
        .and_then(|val| val.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let target = match target_uri(mirror_host, req.uri()) {
        Ok(uri) => uri,
        Err(err) => {
            error!("Failed to assemble upstream URL for path `{path}`:  {err}");
            return quick_response(StatusCode::INTERNAL_SERVER_ERROR, "Invalid upstream URL");
        }
    };

    let outbound_headers = build_outbound_headers(req.headers(), &target, profile);
    let tooling = req
        .headers()
        .get(USER_AGENT)
        .and_then(|val| val.to_str().ok())
        .is_some_and(is_tooling_client);
    let plan = RewritePlan::for_request(profile, host_only(&client_authority), &path, geo, mirror_host);

    let method = req.method().clone();
    let transform_allowed = !tooling && method != Method::HEAD;

    debug!(
        "Proxying {method} {path} for client {} via mirror {mirror_host} (country={:?}, colo={:?})",
        client.ip().to_canonical(),
        geo.country,
        geo.colo
    );

    let body = req.into_body().map_err(ProxyError::Hyper).boxed();

    let mut upstream =
        match forward_upstream(&https_client, method, target, outbound_headers, body).await {
            Ok(response) => response,
            Err(err) => {
                warn!("Proxy request to mirror {mirror_host} failed:  {err}");
                return quick_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Upstream request to {mirror_host} failed: {err}"),
                );
            }
        };

    trace!("Upstream response: {upstream:?}");

    if !client_authority.is_empty() {
        rewrite_redirect(&mut upstream, &client_authority);
    }

    let transform = transform_allowed && is_rewritable_html(upstream.headers());

    let (mut parts, body) = upstream.into_parts();
    let body = body.map_err(ProxyError::Hyper).boxed();

    let body = if transform {
        /* the rewritten stream has a different length */
        parts.headers.remove(CONTENT_LENGTH);
        HtmlRewriteBody::new(body, plan).boxed()
    } else {
        body
    };

    let response = Response::from_parts(parts, body);

    trace!("Outgoing response: {response:?}");

    response
}

#[must_use]
fn is_iokind(err: &hyper::Error, kind: std::io::ErrorKind) -> bool {
    if let Some(err) = std::error::Error::source(&err) {
        if let Some(ioerr) = err.downcast_ref::<std::io::Error>() {
            if ioerr.kind() == kind {
                return true;
            }
        }
    }

    false
}

#[must_use]
fn is_connection_reset(err: &hyper::Error) -> bool {
    is_iokind(err, std::io::ErrorKind::ConnectionReset)
}

#[must_use]
fn is_shutdown_disconnect(err: &hyper::Error) -> bool {
    is_iokind(err, std::io::ErrorKind::NotConnected)
}

#[must_use]
fn is_broken_pipe(err: &hyper::Error) -> bool {
    is_iokind(err, std::io::ErrorKind::BrokenPipe)
}

async fn main_loop() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = global_config();

    let mut addr = SocketAddr::from((config.bind_addr, config.bind_port.get()));

    let listener = match TcpListener::bind(addr).await {
        Ok(x) => x,
        Err(err) => {
            if config.bind_addr != Ipv6Addr::UNSPECIFIED {
                error!("Error binding on {addr}:  {err}");
                Err(err)?;
            }

            // Fallback to IPv4 to avoid errors when IPv6 is not available and the default configuration is used.
            addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.bind_port.get()));
            TcpListener::bind(addr).await.map_err(|err| {
                error!("Error binding fallback on {addr}:  {err}");
                err
            })?
        }
    };
    info!("Listening on http://{addr}");

    #[cfg(all(feature = "tls_default", not(feature = "tls_rustls")))]
    let https_connector = HttpsConnector::new();

    #[cfg(feature = "tls_rustls")]
    let https_connector = {
        /* Set a process wide default crypto provider. */
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let tls_cfg = rustls::ClientConfig::builder()
            .with_native_roots()?
            .with_no_client_auth();
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_cfg)
            .https_or_http()
            .enable_http1()
            .build()
    };

    let mut timeout_connector = hyper_timeout::TimeoutConnector::new(https_connector);
    let http_timeout = match config.http_timeout {
        x if x.is_zero() => None,
        x => Some(x),
    };
    debug!("Using http timeout of {http_timeout:?}");
    timeout_connector.set_connect_timeout(http_timeout);
    timeout_connector.set_read_timeout(http_timeout);
    timeout_connector.set_write_timeout(http_timeout);
    let https_client = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
        .build(timeout_connector);

    let mut term_signal = tokio::signal::unix::signal(SignalKind::terminate())?;

    loop {
        let ht = https_client.clone();

        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, stopping...");
                return Ok(());
            },
            _ = term_signal.recv() => {
                info!("SIGTERM received, stopping...");
                return Ok(());
            },
            n = listener.accept() => n
        };

        let (stream, client) = next.map_err(|err| {
            error!("Error accepting connection:  {err}");
            err
        })?;

        debug!("New client connection from {}", client.ip().to_canonical());
        let client_start = Instant::now();

        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |req| {
                        let ht = ht.clone();
                        async move {
                            Ok::<_, std::convert::Infallible>(
                                route_request(client, req, ht).await,
                            )
                        }
                    }),
                )
                .await
            {
                if err.is_incomplete_message() || is_connection_reset(&err) {
                    info!(
                        "Connection to client {} cancelled",
                        client.ip().to_canonical()
                    );
                } else if is_shutdown_disconnect(&err) {
                    info!(
                        "Improper connection shutdown for client {}:  {err}",
                        client.ip().to_canonical()
                    );
                } else if is_broken_pipe(&err) {
                    info!(
                        "Broken pipe for client {}:  {err}",
                        client.ip().to_canonical()
                    );
                } else {
                    error!(
                        "Error serving connection for client {}:  {err} -- {err:?}",
                        client.ip().to_canonical()
                    );
                }
            }

            debug!(
                "Closed connection to {} after {:?}",
                client.ip().to_canonical(),
                client_start.elapsed()
            );
        });
    }
}

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Logging level
    #[arg(short, long, value_name = "SEVERITY")]
    log_level: Option<LevelFilter>,
    /// Configuration file path
    #[arg(
        short = 'c',
        long,
        default_value = config::DEFAULT_CONFIGURATION_PATH,
        value_name = "PATH"
    )]
    config_path: PathBuf,
    /// Skip timestamp in log messages
    #[arg(long, default_value = "false")]
    skip_log_timestamp: bool,
    /// Permit daemon running as root user (potentially dangerous)
    #[arg(long, default_value = "false")]
    permit_running_daemon_as_root: bool,
}

#[derive(Debug)]
struct RuntimeDetails {
    config: Config,
    profile: &'static Profile,
}

static RUNTIMEDETAILS: OnceLock<RuntimeDetails> = OnceLock::new();

#[must_use]
fn global_config() -> &'static Config {
    &RUNTIMEDETAILS
        .get()
        .expect("Global was initialized in main()")
        .config
}

#[must_use]
fn global_profile() -> &'static Profile {
    RUNTIMEDETAILS
        .get()
        .expect("Global was initialized in main()")
        .profile
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Cli::parse();

    let (config, cfg_fallback) = Config::new(&args.config_path)?;

    let config_log_level = config.log_level;
    let profile =
        Profile::by_name(&config.profile).expect("Profile was validated during config parse");

    RUNTIMEDETAILS
        .set(RuntimeDetails { config, profile })
        .expect("Initial set should succeed");

    let log_config = if args.skip_log_timestamp {
        ConfigBuilder::new()
            .set_time_level(LevelFilter::Off)
            .build()
    } else {
        simplelog::Config::default()
    };

    TermLogger::init(
        args.log_level.unwrap_or(config_log_level),
        log_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    debug!("Logger initialized");

    if cfg_fallback {
        info!(
            "Default configuration file {} not found, using defaults",
            args.config_path.display()
        );
    }

    debug!("Configuration: {:?}", global_config());
    info!("Serving deployment profile `{}`", profile.name);

    if nix::unistd::getuid().is_root() {
        if args.permit_running_daemon_as_root {
            warn!("!! Running as root is not recommended !!");
        } else {
            error!("Running as root is not recommended and not permitted by default");
            std::process::exit(1);
        }
    }

    std::panic::set_hook(Box::new(move |info| {
        error!("{info}");
        eprintln!("{info}");
    }));

    scopeguard::defer! {
        info!("Stopped.");
    }

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("mirror-steer-w")
        .build()
        .expect("Should succeed");

    runtime.block_on(async { main_loop().await })
}
