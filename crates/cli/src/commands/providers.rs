//! `webpilot providers`: list model backends and their credential status.

use webpilot_config::AppConfig;
use webpilot_core::provider::{AuthMode, ProviderDescriptor};
use webpilot_providers::ModelGateway;

pub async fn run(check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let gateway = ModelGateway::from_config(&config);

    println!("🤖 Model Providers");
    println!("==================");
    println!();
    let descriptors = gateway.descriptors();
    for descriptor in &descriptors {
        println!(
            "{}",
            render_row(descriptor, gateway.is_credentialed(&descriptor.id))
        );
    }

    if check {
        println!();
        println!("  Reachability:");
        for descriptor in descriptors
            .iter()
            .filter(|d| gateway.is_credentialed(&d.id))
        {
            let status = match gateway.health(&descriptor.id).await {
                Ok(true) => "✅ reachable".to_string(),
                Ok(false) => "⚠️  responded with an error".to_string(),
                Err(e) => format!("❌ {e}"),
            };
            println!("    {:<12} {status}", descriptor.id);
        }
    }

    println!();
    println!("  Default model: {}", config.default_model);
    println!("  Select another with --model provider:model (e.g. anthropic:claude-sonnet-4-20250514).");
    Ok(())
}

fn render_row(descriptor: &ProviderDescriptor, credentialed: bool) -> String {
    let auth = match descriptor.auth_mode {
        AuthMode::None => "none",
        AuthMode::Bearer => "bearer",
        AuthMode::Header => "header",
        AuthMode::QueryParam => "key param",
    };
    let credential = match (descriptor.auth_mode, credentialed) {
        (AuthMode::None, _) => "not needed",
        (_, true) => "configured",
        (_, false) => "missing",
    };
    let streaming = if descriptor.streaming_supported {
        "stream"
    } else {
        "buffered"
    };
    format!(
        "  {:<12} {:<48} {:<10} {:<9} {credential}",
        descriptor.id, descriptor.base_url, auth, streaming
    )
}
