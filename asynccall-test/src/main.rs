mod cases;
mod messages;
mod service;
mod stream_stream;
mod stream_unary;
mod unary_stream;
mod unary_unary;

use tracing_subscriber::EnvFilter;

use crate::cases::{Fixture, report};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let fixture = Fixture::new()?;

    let mut failed = 0;
    failed += report("Unary-Unary Calls", &unary_unary::run(&fixture).await);
    failed += report("Unary-Stream Calls", &unary_stream::run(&fixture).await);
    failed += report("Stream-Unary Calls", &stream_unary::run(&fixture).await);
    failed += report("Stream-Stream Calls", &stream_stream::run(&fixture).await);

    if failed > 0 {
        anyhow::bail!("{failed} scenario(s) failed");
    }
    tracing::info!("all scenarios passed");
    Ok(())
}
