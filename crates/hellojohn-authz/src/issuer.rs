//! Per-tenant issuer resolution.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerMode {
    #[default]
    Global,
    Path,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerSettings {
    #[serde(default)]
    pub mode: IssuerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_override: Option<String>,
}

/// Compute the `iss` value for a tenant.
///
/// An override wins; otherwise `global` yields the base and `path` yields
/// `base/t/{slug}`. Trailing slashes on the base are dropped so the result is
/// stable regardless of how the base was configured.
pub fn resolve_issuer(global_base: &str, settings: &IssuerSettings, slug: &str) -> String {
    if let Some(value) = settings
        .issuer_override
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return value.trim_end_matches('/').to_string();
    }
    let base = global_base.trim_end_matches('/');
    match settings.mode {
        IssuerMode::Global => base.to_string(),
        IssuerMode::Path => format!("{base}/t/{slug}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_mode_uses_base() {
        let settings = IssuerSettings::default();
        assert_eq!(
            resolve_issuer("https://localhost:8080/", &settings, "local"),
            "https://localhost:8080"
        );
    }

    #[test]
    fn path_mode_appends_slug() {
        let settings = IssuerSettings {
            mode: IssuerMode::Path,
            issuer_override: None,
        };
        assert_eq!(
            resolve_issuer("https://id.example.com", &settings, "acme"),
            "https://id.example.com/t/acme"
        );
    }

    #[test]
    fn override_wins_over_mode() {
        let settings = IssuerSettings {
            mode: IssuerMode::Path,
            issuer_override: Some("https://login.acme.test".to_string()),
        };
        assert_eq!(
            resolve_issuer("https://id.example.com", &settings, "acme"),
            "https://login.acme.test"
        );
    }

    #[test]
    fn blank_override_is_ignored() {
        let settings = IssuerSettings {
            mode: IssuerMode::Global,
            issuer_override: Some("  ".to_string()),
        };
        assert_eq!(
            resolve_issuer("https://id.example.com", &settings, "acme"),
            "https://id.example.com"
        );
    }
}
