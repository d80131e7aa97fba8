use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use kinetix::{
    adapters::{HttpClientAdapter, InMemoryRegistry, SchemaUpdater, middleware::cors_layer, router},
    config::{ConfigValidator, GatewayConfig, load_config, loader::initial_services_from_env},
    core::{
        GatewayService,
        auth::{Claims, issue_token},
    },
    metrics,
    ports::{http_client::HttpClient, registry::ServiceRegistry},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML, TOML or JSON). Without one, defaults plus `KINETIX__*`
    /// environment variables are used.
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Human readable logs instead of JSON
    #[clap(long, global = true)]
    pretty_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate the configuration and exit
    Validate,
    /// Write a sample configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.yaml")]
        output: String,
    },
    /// Mint a development token signed with the configured secret
    Token {
        /// User id placed in `sub`
        #[clap(long, default_value_t = 1)]
        sub: u64,
        #[clap(long, default_value = "admin@localhost")]
        email: String,
        /// Grant admin permissions
        #[clap(long)]
        admin: bool,
        /// Lifetime, e.g. "30m" or "12h"
        #[clap(long, default_value = "1h")]
        ttl: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if args.pretty_logs {
                tracing_setup::init_console_tracing()?;
            } else {
                tracing_setup::init_tracing()?;
            }
            serve(config_path).await
        }
        Commands::Validate => validate_config_command(config_path).await,
        Commands::Init { output } => init_config_command(&output).await,
        Commands::Token {
            sub,
            email,
            admin,
            ttl,
        } => token_command(config_path, sub, email, admin, &ttl).await,
    }
}

async fn load_validated(config_path: Option<&str>) -> Result<GatewayConfig> {
    let config = load_config(config_path)
        .await
        .wrap_err("Failed to load configuration")?;
    ConfigValidator::validate(&config).wrap_err("Invalid configuration")?;
    Ok(config)
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    metrics::init_metrics()?;

    tracing::info!("Loading configuration from {:?}", config_path);
    let config = load_validated(config_path).await?;
    let timings = config.timings()?;

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);
    let registry: Arc<dyn ServiceRegistry> = Arc::new(InMemoryRegistry::new());
    let gateway = Arc::new(
        GatewayService::new(&config, registry, http_client)
            .context("Failed to build gateway service")?,
    );

    let mut initial_services = config.initial_services.clone();
    initial_services.extend(initial_services_from_env());
    let requested = initial_services.len();
    let added = gateway.seed_services(initial_services).await;
    tracing::info!("Registered {} of {} initial services", added, requested);

    let table = gateway.routes().initialize().await;
    for entry in table.entries() {
        tracing::info!(
            "Route: {} -> {} ({})",
            entry.pattern(),
            entry.target().name,
            entry.target().url
        );
    }

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signal_shutdown.run_signal_handler().await;
    });

    let updater = SchemaUpdater::new(gateway.clone(), timings.schema_refresh);
    let updater_handle = tokio::spawn(updater.run(shutdown.shutdown_token()));

    let cors = cors_layer(&config.cors)?;
    let app = router(gateway, cors);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!("Kinetix API gateway listening on {}", addr);
    println!("Kinetix API gateway listening on {addr}");

    let mut server_shutdown = shutdown.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = server_shutdown.wait_for_shutdown().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        })
        .await
        .context("Server error")?;

    if tokio::time::timeout(Duration::from_secs(5), updater_handle)
        .await
        .is_err()
    {
        tracing::warn!("Schema updater did not stop in time");
    }
    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    println!("🔍 Validating configuration: {}", config_path.unwrap_or("<environment only>"));

    if let Some(path) = config_path.filter(|path| !Path::new(path).exists()) {
        eprintln!("❌ Error: Configuration file '{path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Initial Services: {}", config.initial_services.len());
            println!("   • Credential Header: {}", config.forwarding.credential_header);
            println!(
                "   • CORS Origins: {}",
                config.cors.allow_origin_regex.as_deref().unwrap_or("disabled")
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Set auth.secret (or KINETIX__AUTH__SECRET)");
            println!("   • Ensure service URLs start with http:// or https://");
            println!("   • Use humantime durations such as '3s' or '500ms'");
            std::process::exit(1);
        }
    }
}

async fn init_config_command(output: &str) -> Result<()> {
    let path = Path::new(output);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{output}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Kinetix API gateway configuration
listen_addr: "0.0.0.0:8000"

auth:
  # Shared with the user service that issues tokens. Prefer KINETIX__AUTH__SECRET.
  secret: "change-me"

routing:
  staleness: "3s"
  backoff: "10s"

forwarding:
  credential_header: "x-apikey"
  timeout: "30s"

schema:
  refresh_interval: "8s"
  fetch_timeout: "5s"

status:
  ttl: "4s"
  timeout: "2s"
  path: "/health"

cors:
  allow_origin_regex: "^https?://localhost(:[0-9]+)?$"

initial_services:
  - name: "users"
    url: "http://localhost:8001"
    path: "^/users.*"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {output}");
    println!("   Run 'kinetix serve --config {output}' to start the server");
    Ok(())
}

async fn token_command(
    config_path: Option<&str>,
    sub: u64,
    email: String,
    admin: bool,
    ttl: &str,
) -> Result<()> {
    let config = load_config(config_path)
        .await
        .wrap_err("Failed to load configuration")?;
    if config.auth.secret.is_empty() {
        return Err(eyre!("auth.secret is not set"));
    }
    let ttl = humantime::parse_duration(ttl).wrap_err_with(|| format!("Invalid ttl '{ttl}'"))?;
    let ttl = i64::try_from(ttl.as_secs()).wrap_err("ttl is too large")?;

    let iat = Utc::now().timestamp();
    let claims = Claims {
        sub,
        iat,
        exp: iat + ttl,
        email,
        admin,
    };
    let token = issue_token(&claims, &config.auth.secret).wrap_err("Failed to sign token")?;
    println!("{token}");
    Ok(())
}
