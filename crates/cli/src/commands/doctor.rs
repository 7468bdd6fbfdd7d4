//! `webpilot doctor`: Diagnose configuration and environment.

use std::path::Path;
use webpilot_config::AppConfig;
use webpilot_providers::ModelGateway;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 WebPilot Doctor — System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    // Config
    let config_path = AppConfig::config_path();
    let config = if config_path.exists() {
        match AppConfig::load() {
            Ok(config) => {
                println!("  ✅ Config file valid ({})", config_path.display());
                config
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                issues += 1;
                let mut config = AppConfig::default();
                config.apply_env(|name| std::env::var(name).ok());
                config
            }
        }
    } else {
        println!(
            "  ⚠️  No config file at {}, using defaults",
            config_path.display()
        );
        let mut config = AppConfig::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    };

    // Model and credentials
    let gateway = ModelGateway::from_config(&config);
    match gateway
        .resolve(&config.default_model)
        .and_then(|target| gateway.check(&target).map(|_| target))
    {
        Ok(target) => println!("  ✅ Default model {target} is ready"),
        Err(e) => {
            println!("  ❌ Default model: {e}");
            issues += 1;
        }
    }

    // History directory
    let history_dir = config.history.resolved_dir();
    match check_writable(&history_dir) {
        Ok(()) => println!("  ✅ History directory writable ({})", history_dir.display()),
        Err(e) => {
            println!("  ❌ History directory {}: {e}", history_dir.display());
            issues += 1;
        }
    }

    // Browser driver
    if cfg!(feature = "chromium") {
        println!("  ✅ Chromium driver built in (headless: {})", config.browser.headless);
    } else {
        println!("  ❌ No browser driver in this build — rebuild with `--features chromium`");
        issues += 1;
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".doctor-probe");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(probe)
}
