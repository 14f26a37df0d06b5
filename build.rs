fn main() {
    // Load .env file for WiFi and gateway configuration
    load_env_config();

    // Host builds (library + tests) link with the platform defaults
    if std::env::var_os("CARGO_FEATURE_ESP32C3").is_some() {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    // Tell cargo to rerun if environment variables change
    for key in ["WIFI_SSID", "WIFI_PASSWORD", "GATEWAY_IP", "GATEWAY_PORT"] {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    // Note: We need to handle the case where env vars are set to empty strings
    let read = |key: &str| env::var(key).unwrap_or_default().trim().to_string();

    let wifi_ssid = read("WIFI_SSID");
    let wifi_password = read("WIFI_PASSWORD");
    let gateway_ip = read("GATEWAY_IP");
    let gateway_port = read("GATEWAY_PORT");

    // Set environment variables for the compilation
    println!("cargo:rustc-env=WIFI_SSID={}", wifi_ssid);
    println!("cargo:rustc-env=WIFI_PASSWORD={}", wifi_password);
    println!("cargo:rustc-env=GATEWAY_IP={}", gateway_ip);
    println!("cargo:rustc-env=GATEWAY_PORT={}", gateway_port);

    // Print status
    if wifi_ssid.is_empty() {
        println!("cargo:warning=WIFI_SSID is empty - WiFi will not be configured");
    } else {
        println!("cargo:warning=WIFI_SSID configured: {}", wifi_ssid);
    }

    if wifi_password.is_empty() {
        println!("cargo:warning=WIFI_PASSWORD is empty - WiFi will not be configured");
    } else {
        println!("cargo:warning=WIFI_PASSWORD configured (length: {})", wifi_password.len());
    }

    if gateway_ip.is_empty() {
        println!("cargo:warning=GATEWAY_IP is empty - the DHCP router address will be used");
    } else if gateway_ip.parse::<std::net::Ipv4Addr>().is_err() {
        println!("cargo:warning=GATEWAY_IP '{}' is not an IPv4 address - the DHCP router address will be used", gateway_ip);
    } else {
        println!("cargo:warning=GATEWAY_IP configured: {}", gateway_ip);
    }

    if !gateway_port.is_empty() && gateway_port.parse::<u16>().is_err() {
        println!("cargo:warning=GATEWAY_PORT '{}' is not a valid port - the default port will be used", gateway_port);
    }
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
