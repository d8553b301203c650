use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use loupe_api::HttpSearchClient;
use loupe_core::{FacetKey, LoadStatus, NavigatorConfig, Scope};
use loupe_nav::{Navigator, NavigatorView};
use loupe_persist::{from_fragment, to_fragment, Codec, Location};
use loupe_search::{build_request, FilterState};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "loupectl", version, about = "Loupe specimen image navigator CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Search service base url
    #[arg(long = "base-url", global = true, env = "LOUPE_BASE_URL")]
    base_url: Option<String>,

    /// Records per page
    #[arg(long = "page-size", global = true)]
    page_size: Option<u64>,

    /// Request timeout in seconds
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Browse a collection, data resource or institution
    Browse {
        /// Scope id, e.g. co123, dr456, in7
        #[arg(long = "scope")]
        scope: String,
        /// Filter as key=fq or key=label, repeatable (e.g. kingdom=Animalia)
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Start from a shared fragment
        #[arg(long = "fragment")]
        fragment: Option<String>,
        #[arg(long = "first-image-only", action = ArgAction::SetTrue)]
        first_image_only: bool,
        /// Pages to load
        #[arg(long = "pages", default_value_t = 1)]
        pages: usize,
    },
    /// Print the request a selection maps to (no network)
    Request {
        #[arg(long = "scope")]
        scope: Option<String>,
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long = "offset", default_value_t = 0)]
        offset: u64,
    },
    /// Encode or decode the shareable fragment
    Fragment {
        #[command(subcommand)]
        action: FragmentAction,
    },
}

#[derive(Subcommand, Debug)]
enum FragmentAction {
    Encode {
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long = "first-image-only", action = ArgAction::SetTrue)]
        first_image_only: bool,
    },
    Decode { fragment: String },
}

fn init_tracing() {
    let env = std::env::var("LOUPE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LOUPE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid LOUPE_METRICS_ADDR; expected host:port");
        }
    }
}

fn config(cli: &Cli) -> NavigatorConfig {
    let mut cfg = NavigatorConfig::from_env();
    if let Some(url) = &cli.base_url {
        cfg.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(n) = cli.page_size.filter(|n| *n > 0) {
        cfg.page_size = n;
    }
    if let Some(secs) = cli.timeout_secs {
        cfg.request_timeout = Duration::from_secs(secs);
    }
    cfg
}

/// `key=value`; a bare label becomes `key:"label"`.
fn parse_filter(raw: &str) -> Result<(FacetKey, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("filter {:?} is not key=value", raw);
    };
    if key.is_empty() || value.is_empty() {
        bail!("filter {:?} is not key=value", raw);
    }
    let fq = if value.contains(':') { value.to_string() } else { format!("{}:\"{}\"", key, value) };
    Ok((FacetKey::parse(key), fq))
}

/// Fold a fragment and `--filter` flags into a filter state.
fn selection(cfg: &NavigatorConfig, scope: Option<Scope>, fragment: Option<&str>, filters: &[String], first_image_only: bool) -> Result<FilterState> {
    let codec = Codec::from_config(cfg);
    let mut state = FilterState::with_scope(scope);
    if let Some(f) = fragment {
        state.restore(codec.decode(&from_fragment(f)));
    }
    for raw in filters {
        let (key, fq) = parse_filter(raw)?;
        if let FacetKey::Categorical(k) = &key {
            if !cfg.is_categorical(k) {
                bail!("facet {} is not browsable (allowed: {})", k, cfg.categorical_facets.join(","));
            }
        }
        state.apply_filter(&key, fq).with_context(|| format!("applying {}", raw))?;
    }
    if first_image_only {
        state.set_first_image_only(true);
    }
    Ok(state)
}

fn print_view(view: &NavigatorView, fragment: &str) {
    let more = if view.has_more { "yes" } else { "no" };
    println!("status: {}  total: {}  images: {}  more: {}", view.load_status, view.total_records, view.cumulative_images.len(), more);
    if let Some(msg) = &view.failure {
        println!("failure: {}", msg);
    }
    if !view.breadcrumbs.is_empty() {
        let path: Vec<&str> = view.breadcrumbs.iter().map(|b| b.label.as_str()).collect();
        println!("path: {}", path.join(" > "));
    }
    if let Some(rank) = view.active_rank {
        println!("{}:", rank);
        for v in &view.active_rank_values {
            println!("  {:<32} {:>8}", v.label, v.count);
        }
    }
    for f in &view.categorical_facets {
        println!("{}:", f.facet_key);
        for v in &f.values {
            println!("  {:<32} {:>8}", v.label, v.count);
        }
    }
    if !view.cumulative_images.is_empty() {
        println!("RECORD                                IMAGE                                 NAME");
        for img in &view.cumulative_images {
            println!("{:<37} {:<37} {}", img.record_uuid, img.image_id, img.scientific_name);
        }
    }
    println!("fragment: #{}", fragment);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = config(&cli);

    match &cli.command {
        Commands::Browse { scope, filters, fragment, first_image_only, pages } => {
            let scope = cfg.resolve_scope(scope)?;
            let state = selection(&cfg, Some(scope.clone()), fragment.as_deref(), filters, *first_image_only)?;
            let location = Location::new(Codec::from_config(&cfg).encode(state.filters()));
            let client = Arc::new(HttpSearchClient::new(&cfg)?);
            info!(scope = %scope.id, base_url = %client.base_url(), pages, "browse invoked");
            let mut nav = Navigator::new(client, cfg.clone(), Some(scope)).with_location(&location);
            nav.mount();
            for page in 0..(*pages).max(1) {
                if page > 0 && !nav.advance_page() {
                    break;
                }
                let status = tokio::select! {
                    s = nav.settle() => s,
                    _ = signal::ctrl_c() => {
                        warn!("interrupted");
                        break;
                    }
                };
                if status != LoadStatus::Done {
                    break;
                }
            }
            let view = nav.view();
            match cli.output {
                Output::Human => print_view(&view, &location.fragment()),
                Output::Json => {
                    let out = serde_json::json!({ "view": view, "fragment": location.fragment() });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Request { scope, filters, offset } => {
            let scope = scope.as_deref().map(|s| cfg.resolve_scope(s)).transpose()?;
            let mut state = selection(&cfg, scope, None, filters, false)?;
            state.advance_page(*offset);
            let req = build_request(&state, &cfg);
            let url = req.to_url(&cfg.base_url);
            match cli.output {
                Output::Human => println!("{}", url),
                Output::Json => {
                    let out = serde_json::json!({ "request": req, "url": url });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Fragment { action: FragmentAction::Encode { filters, first_image_only } } => {
            let state = selection(&cfg, None, None, filters, *first_image_only)?;
            let fragment = to_fragment(&Codec::from_config(&cfg).encode(state.filters()));
            match cli.output {
                Output::Human => println!("#{}", fragment),
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "fragment": fragment }))?),
            }
        }
        Commands::Fragment { action: FragmentAction::Decode { fragment } } => {
            let filters = Codec::from_config(&cfg).decode(&from_fragment(fragment));
            match cli.output {
                Output::Human => {
                    for (rank, fq) in filters.set_ranks() {
                        println!("{:<12} {}", rank, fq);
                    }
                    for (key, fq) in filters.categoricals() {
                        println!("{:<12} {}", key, fq);
                    }
                    if filters.first_image_only() {
                        println!("{:<12} true", "firstImageOnly");
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&filters)?),
            }
        }
    }
    Ok(())
}
