use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    annex_cli::main_entry().await
}
