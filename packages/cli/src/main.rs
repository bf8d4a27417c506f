//! `pagewise`: page through a JSON REST collection from the command line.
//!
//! One subcommand for now:
//!
//! - **`list`**: fetch every page of a collection endpoint, filter the
//!   records, resolve on-demand fields and print each accepted record as one
//!   line of JSON on stdout.
//!
//! A one-line run summary goes to stderr. Logging is controlled by
//! `RUST_LOG` and also goes to stderr.
//!
//! Exit codes: 0 on success, 1 when the query fails, 2 on usage errors.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pagewise::{JsonMap, OnDemandLoader};
use pagewise_client::pipeline::{FieldEquals, Filter, ResolveFields};
use pagewise_client::{
    ClientConfig, Connection, FieldErrorPolicy, FnProcessor, PagingMode, ProcessorError,
    RestLoader,
};

/// pagewise: paginated JSON REST client
#[derive(Parser)]
#[command(name = "pagewise", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the records of a paginated collection as JSON lines.
    ///
    /// Examples:
    ///   pagewise list /api/v1/projectVersions/3/issues --exclude suppressed=true
    ///   pagewise list /api/v1/issues --on-demand details=/api/v1/issues/{id}/details@data \
    ///     --include details.severity=critical --max 20
    List {
        /// Collection path, joined onto the base URL.
        path: String,

        /// Backend base URL.
        #[arg(long, env = "PAGEWISE_BASE_URL", default_value = "http://127.0.0.1:8080")]
        base_url: String,

        /// Paging scheme: offset | cursor | page
        #[arg(long, value_name = "MODE", default_value_t = PagingMode::Offset)]
        paging: PagingMode,

        /// Response property holding the page's records. Use `.` when the
        /// body is itself the array. Defaults to the pager's own key.
        #[arg(long, value_name = "KEY")]
        items_key: Option<String>,

        /// Records requested per page.
        #[arg(long, env = "PAGEWISE_PAGE_SIZE", default_value_t = 50)]
        page_size: u64,

        /// Stop after printing this many records.
        #[arg(long = "max", env = "PAGEWISE_MAX_RECORDS", value_name = "N")]
        max_records: Option<u64>,

        /// Per-request timeout in seconds.
        #[arg(long = "timeout", env = "PAGEWISE_TIMEOUT_SECS", default_value_t = 30)]
        timeout_secs: u64,

        /// Entries kept by each `--lookup` cache.
        #[arg(long, env = "PAGEWISE_CACHE_SIZE", default_value_t = 16)]
        cache_size: usize,

        /// Extra query parameter sent with every page request: KEY=VALUE.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Ask the backend to embed NAME in every record.
        #[arg(long = "embed", value_name = "NAME")]
        embeds: Vec<String>,

        /// Keep only records whose PATH equals VALUE. Repeat to AND conditions.
        #[arg(long = "include", value_name = "PATH=VALUE")]
        includes: Vec<String>,

        /// Drop records whose PATH equals VALUE.
        #[arg(long = "exclude", value_name = "PATH=VALUE")]
        excludes: Vec<String>,

        /// Attach an on-demand field loaded per record:
        /// KEY=TEMPLATE[@UNWRAP], e.g. details=/issues/{id}/details@data
        #[arg(long = "on-demand", value_name = "KEY=TEMPLATE[@UNWRAP]")]
        on_demand: Vec<String>,

        /// Like --on-demand, but responses are cached by request, for
        /// lookups many records share.
        #[arg(long = "lookup", value_name = "KEY=TEMPLATE[@UNWRAP]")]
        lookups: Vec<String>,

        /// Skip records whose fields cannot be read instead of failing.
        #[arg(long)]
        skip_errors: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagewise=info,pagewise_client=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::List {
            path,
            base_url,
            paging,
            items_key,
            page_size,
            max_records,
            timeout_secs,
            cache_size,
            params,
            embeds,
            includes,
            excludes,
            on_demand,
            lookups,
            skip_errors,
        } => {
            let config = ClientConfig {
                base_url,
                page_size,
                max_records,
                timeout_secs,
                cache_size,
            };
            let conn: Arc<dyn Connection> = Arc::new(
                config
                    .http_connection()
                    .unwrap_or_else(|e| fatal(&format!("cannot create HTTP client: {e}"))),
            );

            tracing::info!(base_url = %config.base_url, %paging, "listing {path}");

            let items_key = items_key.as_deref().map(|k| (k != ".").then_some(k));
            let mut builder = config
                .query(conn.clone(), path)
                .boxed_pager(paging.pager(items_key));
            if skip_errors {
                builder = builder.on_field_error(FieldErrorPolicy::SkipRecord);
            }
            for raw in &params {
                let (key, value) = split_pair(raw, "--param");
                builder = builder.param(key, value);
            }
            for name in embeds {
                builder = builder.embed(name);
            }

            let mut resolve = Vec::new();
            for raw in &on_demand {
                let (key, loader) = parse_loader(raw, "--on-demand", &conn);
                resolve.push(key.clone());
                builder = builder.on_demand(key, Arc::new(loader));
            }
            for raw in &lookups {
                let (key, loader) = parse_loader(raw, "--lookup", &conn);
                resolve.push(key.clone());
                let cached: Arc<dyn OnDemandLoader> = Arc::new(config.cached(loader));
                builder = builder.on_demand(key, cached);
            }

            for raw in &includes {
                let (path, value) = split_pair(raw, "--include");
                builder = builder.filter(Filter::include(FieldEquals::new(path, [value])));
            }
            for raw in &excludes {
                let (path, value) = split_pair(raw, "--exclude");
                builder = builder.filter(Filter::exclude(FieldEquals::new(path, [value])));
            }
            if !resolve.is_empty() {
                builder = builder.enrich(ResolveFields::new(resolve));
            }

            let query = builder.build();
            let stdout = io::stdout();
            let mut sink = FnProcessor(|record: JsonMap| -> Result<(), ProcessorError> {
                let mut out = stdout.lock();
                writeln!(out, "{}", record.to_json())?;
                Ok(())
            });

            match query.run(&mut sink).await {
                Ok(summary) => eprintln!(
                    "pagewise: {} records from {} pages ({} fetched, {} rejected, {} skipped)",
                    summary.dispatched,
                    summary.pages,
                    summary.fetched,
                    summary.rejected,
                    summary.skipped
                ),
                Err(e) => {
                    eprintln!("pagewise: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

/// Split `KEY=VALUE`, exiting with a usage error when there is no `=`.
fn split_pair<'a>(raw: &'a str, flag: &str) -> (&'a str, &'a str) {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => (key, value),
        _ => fatal(&format!("invalid {flag} {raw:?}: expected format KEY=VALUE")),
    }
}

/// Parse `KEY=TEMPLATE[@UNWRAP]` into a key and a [`RestLoader`].
fn parse_loader(raw: &str, flag: &str, conn: &Arc<dyn Connection>) -> (String, RestLoader) {
    let (key, target) = split_pair(raw, flag);
    let (template, unwrap) = split_template(target);
    (key.to_string(), RestLoader::new(Arc::clone(conn), template, unwrap))
}

fn split_template(target: &str) -> (&str, Option<&str>) {
    match target.rsplit_once('@') {
        Some((template, unwrap)) if !unwrap.is_empty() && !unwrap.contains('/') => {
            (template, Some(unwrap))
        }
        _ => (target, None),
    }
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("pagewise: {msg}");
    process::exit(2);
}
