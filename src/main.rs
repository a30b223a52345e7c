use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;
use shadow_rs::shadow;
use snip::{db::CorruptPolicy, render::Renderer, shortener::Shortener};
use tracing_subscriber::EnvFilter;

shadow!(build);

#[derive(Parser, Debug)]
#[command(version = build::VERSION, long_version = build::CLAP_LONG_VERSION, about = "Personal URL shortener", long_about = "")]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
    #[arg(long, env = "BIND", default_value = "0.0.0.0")]
    bind: IpAddr,
    /// JSON snapshot holding every short code
    #[arg(long, env = "DB_FILE", default_value = "urls.json")]
    db_file: PathBuf,
    #[arg(long, env = "ASSETS_DIR", default_value = "public")]
    assets_dir: PathBuf,
    /// host used in short URLs when a request has no Host header [default: localhost:<port>]
    #[arg(long, env = "PUBLIC_HOST")]
    public_host: Option<String>,
    #[arg(long, env = "ON_CORRUPT", value_enum, default_value_t = CorruptPolicy::Fail)]
    on_corrupt: CorruptPolicy,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // construct a subscriber that prints formatted traces to stdout
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    tracing::info!("{:?}", &args);

    // a snapshot that cannot be read should stop startup, not get overwritten
    let db = snip::db::Db::open(&args.db_file, args.on_corrupt)?;

    let public_host = args
        .public_host
        .clone()
        .unwrap_or_else(|| format!("localhost:{}", args.port));
    let renderer = Renderer::new(Shortener::new(db), &public_host)?;
    let routes = snip::routes::get_routes(renderer, args.assets_dir.clone());

    let addr = SocketAddr::new(args.bind, args.port);
    tracing::info!("server running on http://{}", &public_host);
    tracing::info!("snapshot: {}", args.db_file.display());
    warp::serve(routes)
        .bind(addr)
        .await
        .graceful(async {
            tokio::signal::ctrl_c()
                .await
                .expect("\nfailed to install CTRL+C signal handler");
        })
        .run()
        .await;

    tracing::info!("gracefully exited.");

    Ok(())
}
