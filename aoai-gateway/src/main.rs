//! AOAI Gateway Server
//!
//! Main entry point for the Azure OpenAI load balancing gateway

use aoai_gateway::start_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start_server().await
}
