//! Gateway inspection commands

use crate::config::CliConfigLoader;
use anyhow::Result;
use bible_chat_core::ToolClient;
use colored::Colorize;
use tracing::info;

/// Show the tools and resources the gateway offers
pub async fn tools_command(config_loader: CliConfigLoader) -> Result<()> {
    info!("Listing available tools");

    let gateway = config_loader.load_gateway().await?;
    let client = ToolClient::connect(&gateway).await?;
    let server = client.server_info().await?;
    println!(
        "🛠️  Tools offered by {} {}\n",
        server.name.bold(),
        server.version
    );

    let tools = client.list_tools().await?;
    for tool in tools.iter() {
        println!("📦 {}", tool.name.bold());
        // First line of the description only, for brevity
        if let Some(first_line) = tool.description.lines().next() {
            println!("   {}\n", first_line);
        }
    }

    match client.list_resources().await {
        Ok(resources) if !resources.is_empty() => {
            println!("📚 Resources\n");
            for resource in &resources {
                println!("   {}  {}", resource.uri.cyan(), resource.name);
            }
        }
        Ok(_) => {}
        Err(e) => info!("Gateway does not list resources: {}", e),
    }

    client.shutdown().await;
    Ok(())
}

/// Print one gateway resource
pub async fn resource_command(uri: String, config_loader: CliConfigLoader) -> Result<()> {
    let gateway = config_loader.load_gateway().await?;
    let client = ToolClient::connect(&gateway).await?;
    let text = client.read_resource(&uri).await;
    client.shutdown().await;

    println!("{}", text?);
    Ok(())
}
