//! Startup banner

use super::config::is_all_interfaces;
use super::constants::APP_NAME;
use crate::domain::settings::{StorageMode, StorageStatus};

/// What the banner reports about the running service
pub struct BannerInfo<'a> {
    pub host: &'a str,
    pub port: u16,
    pub storage: StorageStatus,
    pub admin_guard: bool,
    /// `None` when rate limiting is disabled
    pub rate_limit_backend: Option<&'a str>,
    pub encrypted: bool,
    pub data_dir: &'a str,
}

/// Print the startup banner with URLs and security posture
pub fn print_banner(info: &BannerInfo<'_>) {
    // Use localhost for display when binding to all interfaces
    let display_host = if is_all_interfaces(info.host) {
        "localhost"
    } else {
        info.host
    };
    let base = format!("http://{}:{}", display_host, info.port);

    const W: usize = 14;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}/api/v1/settings",
        "Settings:", base
    );
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}/api/docs",
        "API docs:", base
    );

    let storage = match info.storage.mode {
        StorageMode::Primary => info.storage.backend.to_string(),
        StorageMode::Fallback => format!("{} \x1b[33m(fallback)\x1b[0m", info.storage.backend),
    };
    println!("  \x1b[90m➜\x1b[0m  {:<W$} {}", "Storage:", storage);
    println!(
        "  \x1b[90m➜\x1b[0m  {:<W$} {}",
        "Encryption:",
        if info.encrypted { "on" } else { "\x1b[33moff\x1b[0m" }
    );
    println!(
        "  \x1b[90m➜\x1b[0m  {:<W$} {}",
        "Admin token:",
        if info.admin_guard {
            "required"
        } else {
            "\x1b[33mnot configured\x1b[0m"
        }
    );
    println!(
        "  \x1b[90m➜\x1b[0m  {:<W$} {}",
        "Rate limit:",
        info.rate_limit_backend.unwrap_or("disabled")
    );
    println!("  \x1b[90m➜  {:<W$} {}\x1b[0m", "Data:", info.data_dir);
    println!();
}
