// =============================================================================
// Safety Preflight — refuse to start with credentials in reach
// =============================================================================
//
// This process must never be able to sign or place a real order. The
// cheapest way to guarantee that is to refuse to run at all when anything
// credential-shaped is visible: suspicious environment variable names,
// 64-hex private-key-shaped values in the environment, or the same patterns
// inside the serialized config. A hit terminates the process with exit
// code 1 before any task starts.
// =============================================================================

use serde_json::Value;

use crate::config::BotConfig;

/// Name fragments that mark a variable as credential-like.
const SUSPICIOUS_NAME_FRAGMENTS: [&str; 6] = [
    "PRIVATE_KEY",
    "MNEMONIC",
    "WALLET",
    "SIGNER",
    "SIGNING",
    "SEED_PHRASE",
];

/// Scan the process environment and the config for credential-like material.
/// Returns the list of violations; empty means safe to start.
pub fn scan(config: &BotConfig) -> Vec<String> {
    let mut violations = Vec::new();

    for (name, value) in std::env::vars() {
        let upper = name.to_uppercase();
        if SUSPICIOUS_NAME_FRAGMENTS.iter().any(|f| upper.contains(f)) {
            violations.push(format!("environment variable '{name}' has a credential-like name"));
        }
        if looks_like_private_key(&value) {
            violations.push(format!(
                "environment variable '{name}' holds a 64-hex private-key-shaped value"
            ));
        }
    }

    if let Ok(json) = serde_json::to_value(config) {
        scan_config_value("config", &json, &mut violations);
    }

    violations
}

fn scan_config_value(path: &str, value: &Value, violations: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let upper = key.to_uppercase();
                if SUSPICIOUS_NAME_FRAGMENTS.iter().any(|f| upper.contains(f)) {
                    violations.push(format!("config field '{path}.{key}' has a credential-like name"));
                }
                scan_config_value(&format!("{path}.{key}"), child, violations);
            }
        }
        Value::Array(arr) => {
            for (i, child) in arr.iter().enumerate() {
                scan_config_value(&format!("{path}[{i}]"), child, violations);
            }
        }
        Value::String(s) => {
            if looks_like_private_key(s) {
                violations.push(format!(
                    "config field '{path}' holds a 64-hex private-key-shaped value"
                ));
            }
        }
        _ => {}
    }
}

/// 64 hex characters, with or without a 0x prefix.
fn looks_like_private_key(value: &str) -> bool {
    let trimmed = value.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}
