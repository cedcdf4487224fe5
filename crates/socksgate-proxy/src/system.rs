//! OS system proxy backend.
//!
//! - Linux: GNOME `gsettings` (`org.gnome.system.proxy.socks`, `ignore-hosts`)
//! - macOS: `networksetup` SOCKS firewall proxy and bypass domains
//! - Windows: WinINet registry values through PowerShell
//!
//! System proxies cannot carry SOCKS credentials; they are ignored with a
//! warning.

use std::process::Command;

use async_trait::async_trait;
use socksgate_core::{BypassList, BypassRule, ProxyTarget};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};
use crate::host::{HostEvent, HostProxyConfig, HostProxyService};

/// Host proxy service backed by the operating system settings.
#[derive(Debug, Clone)]
pub struct SystemProxyService {
    events: broadcast::Sender<HostEvent>,
}

impl Default for SystemProxyService {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProxyService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self { events }
    }
}

#[async_trait]
impl HostProxyService for SystemProxyService {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn apply(&self, config: &HostProxyConfig) -> Result<()> {
        if let Some(target) = config.target() {
            if target.credentials().is_some() {
                warn!("System proxy settings cannot store SOCKS credentials; ignoring them");
            }
        }

        debug!(%config, "Applying system proxy");
        let config = config.clone();
        run_blocking(move || platform::apply(&config)).await
    }

    async fn active(&self) -> Result<HostProxyConfig> {
        run_blocking(platform::read).await
    }

    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn report(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProxyError::HostService(format!("system proxy worker failed: {}", e)))?
}

/// Runs a command and returns its stdout.
#[allow(dead_code)]
fn run(program: &str, args: &[&str]) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args);

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let output = command
        .output()
        .map_err(|e| ProxyError::HostService(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProxyError::HostService(format!(
            "{} failed: {}",
            program,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ============================================================================
// Native formats
// ============================================================================

/// Expands bypass rules into plain host entries. A domain rule becomes both
/// the bare domain and its `*.` wildcard.
pub fn native_bypass_entries(bypass: &BypassList) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();
    for rule in bypass.iter() {
        let expanded = match rule {
            BypassRule::Host(host) => vec![host.clone()],
            BypassRule::Domain(base) => vec![base.clone(), format!("*.{}", base)],
        };
        for entry in expanded {
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
    }
    entries
}

/// Folds native entries back into bypass rules, undoing
/// [`native_bypass_entries`].
pub fn bypass_from_native<I, S>(entries: I) -> BypassList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let rules: Vec<BypassRule> = entries
        .into_iter()
        .filter_map(|entry| BypassRule::from_token(entry.as_ref()))
        .collect();

    let domains: Vec<&str> = rules
        .iter()
        .filter_map(|rule| match rule {
            BypassRule::Domain(base) => Some(base.as_str()),
            BypassRule::Host(_) => None,
        })
        .collect();

    let folded: Vec<BypassRule> = rules
        .iter()
        .filter(|rule| !matches!(rule, BypassRule::Host(host) if domains.contains(&host.as_str())))
        .cloned()
        .collect();

    BypassList::from_rules(folded)
}

/// GVariant string array: `['a', 'b']`.
pub fn gnome_string_array(entries: &[String]) -> String {
    let quoted: Vec<String> = entries
        .iter()
        .map(|e| format!("'{}'", e.replace('\'', "")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Parses a `gsettings get` string value (`'manual'`).
pub fn parse_gnome_string(raw: &str) -> String {
    raw.trim().trim_matches('\'').to_string()
}

/// Parses a `gsettings get` string array (`['a', 'b']` or `@as []`).
pub fn parse_gnome_string_array(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("@as").unwrap_or(raw).trim();
    let inner = raw
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(raw);

    inner
        .split(',')
        .map(parse_gnome_string)
        .filter(|e| !e.is_empty())
        .collect()
}

/// `key: value` lines as printed by `networksetup -get…proxy`.
pub fn parse_networksetup_proxy(stdout: &str) -> (bool, String, u16) {
    let mut enabled = false;
    let mut server = String::new();
    let mut port = 0;

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Enabled" => enabled = value.eq_ignore_ascii_case("yes"),
            "Server" => server = value.to_string(),
            "Port" => port = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    (enabled, server, port)
}

/// Output of `networksetup -getproxybypassdomains`.
pub fn parse_networksetup_bypass(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("There aren't any"))
        .map(str::to_string)
        .collect()
}

/// WinINet `ProxyServer` value routing only SOCKS traffic.
pub fn windows_proxy_server(target: &ProxyTarget) -> String {
    format!("socks={}", target.endpoint())
}

/// Extracts the SOCKS endpoint from a WinINet `ProxyServer` value.
pub fn parse_windows_proxy_server(raw: &str) -> Option<(String, u16)> {
    let socks = raw.split(';').find_map(|part| {
        let (scheme, endpoint) = part.trim().split_once('=')?;
        scheme.eq_ignore_ascii_case("socks").then_some(endpoint)
    })?;

    let (host, port) = socks.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host.to_string(), port.parse().ok()?))
}

/// Builds a host configuration from what the OS reports.
fn reported_config(
    enabled: bool,
    host: &str,
    port: u16,
    bypass: Vec<String>,
) -> Result<HostProxyConfig> {
    if !enabled || host.is_empty() || port == 0 {
        return Ok(HostProxyConfig::Direct);
    }

    let target = ProxyTarget::new(host, port)
        .map_err(|e| ProxyError::HostService(format!("system reports unusable proxy: {}", e)))?;
    Ok(HostProxyConfig::fixed(target, bypass_from_native(bypass)))
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod platform {
    use super::*;

    const PROXY: &str = "org.gnome.system.proxy";
    const SOCKS: &str = "org.gnome.system.proxy.socks";

    pub fn apply(config: &HostProxyConfig) -> Result<()> {
        match config {
            HostProxyConfig::Direct => {
                run("gsettings", &["set", PROXY, "mode", "none"])?;
            }
            HostProxyConfig::FixedServers { target, bypass } => {
                let port = target.port().to_string();
                let ignore = gnome_string_array(&native_bypass_entries(bypass));
                run("gsettings", &["set", SOCKS, "host", target.host()])?;
                run("gsettings", &["set", SOCKS, "port", &port])?;
                run("gsettings", &["set", PROXY, "ignore-hosts", &ignore])?;
                // Switch last so the proxy goes live fully configured.
                run("gsettings", &["set", PROXY, "mode", "manual"])?;
            }
        }
        Ok(())
    }

    pub fn read() -> Result<HostProxyConfig> {
        let mode = parse_gnome_string(&run("gsettings", &["get", PROXY, "mode"])?);
        if mode != "manual" {
            return Ok(HostProxyConfig::Direct);
        }

        let host = parse_gnome_string(&run("gsettings", &["get", SOCKS, "host"])?);
        let port = run("gsettings", &["get", SOCKS, "port"])?
            .trim()
            .parse()
            .unwrap_or(0);
        let ignore = parse_gnome_string_array(&run("gsettings", &["get", PROXY, "ignore-hosts"])?);

        reported_config(true, &host, port, ignore)
    }
}

// ============================================================================
// macOS Implementation
// ============================================================================

#[cfg(target_os = "macos")]
mod platform {
    use super::*;

    fn active_network_service() -> Result<String> {
        let stdout = run("networksetup", &["-listallnetworkservices"])?;

        for service in ["Wi-Fi", "Ethernet", "USB 10/100/1000 LAN"] {
            if stdout.lines().any(|line| line.trim() == service) {
                return Ok(service.to_string());
            }
        }

        // First enabled service, skipping the header line
        stdout
            .lines()
            .skip(1)
            .find(|line| !line.starts_with('*') && !line.trim().is_empty())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProxyError::HostService("Could not find active network service".into()))
    }

    pub fn apply(config: &HostProxyConfig) -> Result<()> {
        let service = active_network_service()?;

        match config {
            HostProxyConfig::Direct => {
                run("networksetup", &["-setsocksfirewallproxystate", &service, "off"])?;
            }
            HostProxyConfig::FixedServers { target, bypass } => {
                let port = target.port().to_string();
                run(
                    "networksetup",
                    &["-setsocksfirewallproxy", &service, target.host(), &port],
                )?;

                let entries = native_bypass_entries(bypass);
                let mut args = vec!["-setproxybypassdomains", service.as_str()];
                args.extend(entries.iter().map(String::as_str));
                run("networksetup", &args)?;

                run("networksetup", &["-setsocksfirewallproxystate", &service, "on"])?;
            }
        }
        Ok(())
    }

    pub fn read() -> Result<HostProxyConfig> {
        let service = active_network_service()?;
        let (enabled, host, port) =
            parse_networksetup_proxy(&run("networksetup", &["-getsocksfirewallproxy", &service])?);
        if !enabled {
            return Ok(HostProxyConfig::Direct);
        }

        let bypass =
            parse_networksetup_bypass(&run("networksetup", &["-getproxybypassdomains", &service])?);
        reported_config(enabled, &host, port, bypass)
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(target_os = "windows")]
mod platform {
    use super::*;

    const REG_PATH: &str = r"HKCU:\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

    fn powershell(script: &str) -> Result<String> {
        run(
            "powershell",
            &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", script],
        )
    }

    pub fn apply(config: &HostProxyConfig) -> Result<()> {
        let script = match config {
            HostProxyConfig::Direct => format!(
                "Set-ItemProperty -Path '{}' -Name ProxyEnable -Value 0",
                REG_PATH
            ),
            HostProxyConfig::FixedServers { target, bypass } => format!(
                r#"
                $regPath = '{}'
                Set-ItemProperty -Path $regPath -Name ProxyServer -Value '{}'
                Set-ItemProperty -Path $regPath -Name ProxyOverride -Value '{}'
                Set-ItemProperty -Path $regPath -Name ProxyEnable -Value 1
                "#,
                REG_PATH,
                windows_proxy_server(target),
                native_bypass_entries(bypass).join(";"),
            ),
        };

        powershell(&script).map(|_| ())
    }

    pub fn read() -> Result<HostProxyConfig> {
        let script = format!(
            r#"
            $props = Get-ItemProperty -Path '{}' -ErrorAction SilentlyContinue
            Write-Output "$($props.ProxyEnable)|$($props.ProxyServer)|$($props.ProxyOverride)"
            "#,
            REG_PATH
        );
        let stdout = powershell(&script)?;

        let mut parts = stdout.trim().splitn(3, '|');
        let enabled = parts.next().unwrap_or_default().trim() == "1";
        let server = parts.next().unwrap_or_default();
        let overrides: Vec<String> = parts
            .next()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|e| !e.is_empty() && *e != "<local>")
            .map(str::to_string)
            .collect();

        match parse_windows_proxy_server(server) {
            Some((host, port)) => reported_config(enabled, &host, port, overrides),
            None => Ok(HostProxyConfig::Direct),
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
mod platform {
    use super::*;

    pub fn apply(_config: &HostProxyConfig) -> Result<()> {
        Err(ProxyError::HostService("Unsupported operating system".into()))
    }

    pub fn read() -> Result<HostProxyConfig> {
        Err(ProxyError::HostService("Unsupported operating system".into()))
    }
}

// ============================================================================
// Tests
// ============================================================================
