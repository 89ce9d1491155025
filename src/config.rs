//! Configuration resolution for the jump-host chain server.
//!
//! Values follow a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Per-hop connect timeout in seconds |
//! | `SSH_AUTH_TIMEOUT` | 30s | Per-hop authentication timeout in seconds |
//! | `SSH_KEEPALIVE_INTERVAL` | 5s | Keepalive interval in seconds |
//! | `SSH_INACTIVITY_TIMEOUT` | 1800s | Inactivity timeout in seconds |
//! | `SSH_KNOWN_HOSTS` | `~/.ssh/known_hosts` | known_hosts file |
//! | `SSH_INVENTORY` | `./inventory.json` | Hosts, keys and port forwardings |
//! | `MCP_PORT` | 8000 | HTTP listen port |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 5;
pub(crate) const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 1800;
pub(crate) const DEFAULT_INVENTORY_PATH: &str = "inventory.json";
pub(crate) const DEFAULT_MCP_PORT: u16 = 8000;

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const AUTH_TIMEOUT_ENV_VAR: &str = "SSH_AUTH_TIMEOUT";
pub(crate) const KEEPALIVE_INTERVAL_ENV_VAR: &str = "SSH_KEEPALIVE_INTERVAL";
pub(crate) const INACTIVITY_TIMEOUT_ENV_VAR: &str = "SSH_INACTIVITY_TIMEOUT";
pub(crate) const KNOWN_HOSTS_ENV_VAR: &str = "SSH_KNOWN_HOSTS";
pub(crate) const INVENTORY_ENV_VAR: &str = "SSH_INVENTORY";
pub(crate) const MCP_PORT_ENV_VAR: &str = "MCP_PORT";

/// Parameter, then a parseable env var, then the default.
fn resolve_parsed<T: FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.trim().parse::<T>()
    {
        return value;
    }

    default
}

/// Resolve the per-hop connect timeout with priority: parameter -> env var -> default
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_parsed(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    ))
}

/// Resolve the per-hop authentication timeout with priority: parameter -> env var -> default
pub fn resolve_auth_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_parsed(
        timeout_param,
        AUTH_TIMEOUT_ENV_VAR,
        DEFAULT_AUTH_TIMEOUT_SECS,
    ))
}

pub fn resolve_keepalive_interval(interval_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_parsed(
        interval_param,
        KEEPALIVE_INTERVAL_ENV_VAR,
        DEFAULT_KEEPALIVE_INTERVAL_SECS,
    ))
}

pub fn resolve_inactivity_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_parsed(
        timeout_param,
        INACTIVITY_TIMEOUT_ENV_VAR,
        DEFAULT_INACTIVITY_TIMEOUT_SECS,
    ))
}

/// Resolve the known_hosts path. `None` when no home directory can be found
/// and nothing was configured, which disables host key persistence.
pub fn resolve_known_hosts_path(path_param: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path_param {
        return Some(path);
    }

    if let Ok(path) = env::var(KNOWN_HOSTS_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path.trim()));
    }

    home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

pub fn resolve_inventory_path(path_param: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path_param {
        return path;
    }

    if let Ok(path) = env::var(INVENTORY_ENV_VAR)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path.trim());
    }

    PathBuf::from(DEFAULT_INVENTORY_PATH)
}

pub fn resolve_mcp_port(port_param: Option<u16>) -> u16 {
    resolve_parsed(port_param, MCP_PORT_ENV_VAR, DEFAULT_MCP_PORT)
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Resolved settings for the russh transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub keepalive_interval: Duration,
    pub inactivity_timeout: Duration,
    pub known_hosts: Option<PathBuf>,
}

impl TransportConfig {
    /// Every value from env vars or defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: resolve_connect_timeout(None),
            auth_timeout: resolve_auth_timeout(None),
            keepalive_interval: resolve_keepalive_interval(None),
            inactivity_timeout: resolve_inactivity_timeout(None),
            known_hosts: resolve_known_hosts_path(None),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_INTERVAL_SECS),
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            known_hosts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Env var tests share process state and must not interleave
    static ENV_TEST_MUTEX: once_cell::sync::Lazy<StdMutex<()>> =
        once_cell::sync::Lazy::new(|| StdMutex::new(()));

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX.
    unsafe fn set_env(key: &str, value: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::set_var(key, value) };
    }

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX.
    unsafe fn remove_env(key: &str) {
        // SAFETY: Caller ensures ENV_TEST_MUTEX is held
        unsafe { env::remove_var(key) };
    }

    mod config_resolution {
        use super::*;

        mod connect_timeout {
            use super::*;

            #[test]
            fn test_uses_param_when_provided() {
                assert_eq!(resolve_connect_timeout(Some(60)), Duration::from_secs(60));
            }

            #[test]
            fn test_param_takes_priority_over_env() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(CONNECT_TIMEOUT_ENV_VAR, "120");
                }
                let result = resolve_connect_timeout(Some(45));
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(CONNECT_TIMEOUT_ENV_VAR);
                }
                assert_eq!(result, Duration::from_secs(45));
            }

            #[test]
            fn test_uses_env_var_when_no_param() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(CONNECT_TIMEOUT_ENV_VAR, "90");
                }
                let result = resolve_connect_timeout(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(CONNECT_TIMEOUT_ENV_VAR);
                }
                assert_eq!(result, Duration::from_secs(90));
            }

            #[test]
            fn test_ignores_negative_env_var() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(CONNECT_TIMEOUT_ENV_VAR, "-10");
                }
                let result = resolve_connect_timeout(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(CONNECT_TIMEOUT_ENV_VAR);
                }
                assert_eq!(result, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
            }
        }

        mod auth_timeout {
            use super::*;

            #[test]
            fn test_uses_default_when_no_param_or_env() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(AUTH_TIMEOUT_ENV_VAR);
                }
                assert_eq!(
                    resolve_auth_timeout(None),
                    Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS)
                );
            }

            #[test]
            fn test_ignores_invalid_env_var() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(AUTH_TIMEOUT_ENV_VAR, "soon");
                }
                let result = resolve_auth_timeout(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(AUTH_TIMEOUT_ENV_VAR);
                }
                assert_eq!(result, Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS));
            }
        }

        mod keepalive {
            use super::*;

            #[test]
            fn test_env_value_is_trimmed() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(KEEPALIVE_INTERVAL_ENV_VAR, " 15 ");
                }
                let result = resolve_keepalive_interval(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(KEEPALIVE_INTERVAL_ENV_VAR);
                }
                assert_eq!(result, Duration::from_secs(15));
            }

            #[test]
            fn test_inactivity_default() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(INACTIVITY_TIMEOUT_ENV_VAR);
                }
                assert_eq!(
                    resolve_inactivity_timeout(None),
                    Duration::from_secs(30 * 60)
                );
            }
        }

        mod paths {
            use super::*;

            #[test]
            fn test_known_hosts_from_env() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(KNOWN_HOSTS_ENV_VAR, "/tmp/kh");
                }
                let result = resolve_known_hosts_path(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(KNOWN_HOSTS_ENV_VAR);
                }
                assert_eq!(result, Some(PathBuf::from("/tmp/kh")));
            }

            #[test]
            fn test_known_hosts_defaults_under_home() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                let previous_home = env::var("HOME").ok();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(KNOWN_HOSTS_ENV_VAR);
                    set_env("HOME", "/home/tester");
                }
                let result = resolve_known_hosts_path(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    match previous_home {
                        Some(home) => set_env("HOME", &home),
                        None => remove_env("HOME"),
                    }
                }
                assert_eq!(
                    result,
                    Some(PathBuf::from("/home/tester/.ssh/known_hosts"))
                );
            }

            #[test]
            fn test_inventory_param_wins() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(INVENTORY_ENV_VAR, "/etc/inv.json");
                }
                let result = resolve_inventory_path(Some(PathBuf::from("mine.json")));
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(INVENTORY_ENV_VAR);
                }
                assert_eq!(result, PathBuf::from("mine.json"));
            }

            #[test]
            fn test_inventory_default() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(INVENTORY_ENV_VAR);
                }
                assert_eq!(
                    resolve_inventory_path(None),
                    PathBuf::from(DEFAULT_INVENTORY_PATH)
                );
            }
        }

        mod mcp_port {
            use super::*;

            #[test]
            fn test_port_out_of_range_uses_default() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(MCP_PORT_ENV_VAR, "70000");
                }
                let result = resolve_mcp_port(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(MCP_PORT_ENV_VAR);
                }
                assert_eq!(result, DEFAULT_MCP_PORT);
            }

            #[test]
            fn test_port_from_env() {
                let _guard = ENV_TEST_MUTEX.lock().unwrap();
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    set_env(MCP_PORT_ENV_VAR, "9001");
                }
                let result = resolve_mcp_port(None);
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe {
                    remove_env(MCP_PORT_ENV_VAR);
                }
                assert_eq!(result, 9001);
            }
        }
    }
}
