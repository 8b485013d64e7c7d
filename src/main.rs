mod cli;
mod keys;
mod sequencer;
mod songfile;
mod spotify;
mod store;
mod tools;
mod types;

use rmcp::ServiceExt;
use rmcp::transport::stdio;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Any argument selects the batch CLI; a bare invocation serves MCP
    // over stdio.
    if std::env::args().nth(1).is_some() {
        return cli::main().await;
    }

    let server = tools::KeyflowServer::new();
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
