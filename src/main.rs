#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = bandscore_pipeline::run().await {
        eprintln!("bandscore-api fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
