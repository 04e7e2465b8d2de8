use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    gatebot::cli::run().await
}
