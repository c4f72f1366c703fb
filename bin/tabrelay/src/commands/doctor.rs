use std::time::Duration;

use tabrelay_core::{Config, Paths};
use tabrelay_host::{find_browser_binary, CdpBrowser};

/// Run environment diagnostics and print a short report.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 tabrelay doctor — Environment Diagnostics");
    println!("   {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    let config_path = paths.config_file();
    if config_path.exists() {
        print_ok("Config file exists", &config_path.display().to_string());
        ok_count += 1;
    } else {
        print_warn(
            "Config file not found",
            "Defaults apply; write ~/.tabrelay/config.json to customize",
        );
        warn_count += 1;
    }

    let config = match Config::load_or_default(&paths) {
        Ok(config) => {
            print_ok("Config parses", "");
            ok_count += 1;
            config
        }
        Err(e) => {
            print_err("Config unreadable", &e.to_string());
            err_count += 1;
            Config::default()
        }
    };

    println!("  Bridge bind: {}:{}", config.bridge.host, config.bridge.port);
    match config.bridge.auth_token.as_deref() {
        Some(t) if !t.is_empty() => {
            print_ok("Auth token configured", "");
            ok_count += 1;
        }
        _ => {
            print_warn(
                "No auth token",
                "Loopback-only by default; set bridge.authToken to require one",
            );
            warn_count += 1;
        }
    }
    println!();

    // --- 2. Data directory ---
    println!("📁 Data directory");
    if paths.base.exists() {
        print_ok("Base directory exists", &paths.base.display().to_string());
        ok_count += 1;
        let probe = paths.base.join(".doctor_probe");
        match std::fs::write(&probe, "probe") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
                print_ok("Base directory writable", "");
                ok_count += 1;
            }
            Err(e) => {
                print_err("Base directory not writable", &e.to_string());
                err_count += 1;
            }
        }
    } else {
        print_warn(
            "Base directory not created yet",
            "Created on first `tabrelay bridge` or `tabrelay host` run",
        );
        warn_count += 1;
    }
    println!();

    // --- 3. Browser ---
    println!("🌐 Browser");
    let timeout = Duration::from_secs(config.browser.protocol_timeout_secs);
    let browser = CdpBrowser::new(&config.browser.cdp_url, timeout);
    match browser.version().await {
        Ok(version) => {
            let name = version
                .get("Browser")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            print_ok(
                "DevTools endpoint reachable",
                &format!("{} at {}", name, config.browser.cdp_url),
            );
            ok_count += 1;
        }
        Err(e) => {
            print_warn("DevTools endpoint unreachable", &e.to_string());
            println!("     Start a browser with --remote-debugging-port={}", port_of(&config.browser.cdp_url));
            println!("     or run `tabrelay host --launch` to start one automatically");
            warn_count += 1;
        }
    }

    match find_browser_binary(config.browser.binary.as_deref()) {
        Ok(binary) => {
            print_ok("Browser binary found", &binary);
            ok_count += 1;
        }
        Err(e) => {
            print_warn("No launchable browser binary", &e.to_string());
            warn_count += 1;
        }
    }
    println!();

    // --- Summary ---
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  ✅ {} passed  ⚠️  {} warnings  ❌ {} errors",
        ok_count, warn_count, err_count
    );
    if err_count > 0 {
        println!();
        println!("  {} error(s) must be fixed before normal use.", err_count);
    } else if warn_count > 0 {
        println!();
        println!("  Core checks OK. Some optional pieces not ready.");
    } else {
        println!();
        println!("  🎉 All good!");
    }
    println!();

    Ok(())
}

fn port_of(cdp_url: &str) -> u16 {
    url::Url::parse(cdp_url)
        .ok()
        .and_then(|u| u.port())
        .unwrap_or(9222)
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
