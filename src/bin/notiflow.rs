//! Command-line entry point for the notiflow client.

#[tokio::main]
async fn main() -> anyhow::Result<()> { notiflow::client::run().await }
