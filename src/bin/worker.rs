#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = bandscore_pipeline::run_worker().await {
        eprintln!("bandscore-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
