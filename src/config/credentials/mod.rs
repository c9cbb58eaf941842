use super::schema::Config;
use tracing::debug;

macro_rules! define_credentials {
    ($( $name:literal, $env:literal => $($path:ident).+ );* $(;)?) => {
        /// All known credential slot names.
        pub const CREDENTIAL_NAMES: &[&str] = &[$($name),*];

        /// (slot name, env var name) pairs.
        pub const CREDENTIAL_ENV_VARS: &[(&str, &str)] = &[$(($name, $env)),*];

        /// Get the current value of a credential field by slot name.
        pub fn get_credential_value<'a>(config: &'a Config, name: &str) -> Option<&'a str> {
            match name {
                $($name => Some(config.$($path).+.as_str()),)*
                _ => None,
            }
        }

        /// Apply environment variable overrides.
        ///
        /// Any `WABRIDGE_*` credential env var that is set and non-empty will
        /// overwrite the corresponding config field, allowing secrets to be
        /// injected without touching the config file.
        pub fn apply_env_overrides(config: &mut Config) {
            $(
                if let Ok(val) = std::env::var($env) {
                    if !val.is_empty() {
                        debug!("loaded {} from {}", $name, $env);
                        config.$($path).+ = val;
                    }
                }
            )*
        }
    };
}

define_credentials! {
    "access-key",       "WABRIDGE_ACCESS_KEY"     => gateway.access_key;
    "webhook-url",      "WABRIDGE_WEBHOOK_URL"    => webhook.url;
    "sidecar-secret",   "WABRIDGE_SIDECAR_SECRET" => engine.callback_secret;
}

/// Apply the plain deployment variables a process manager typically sets
/// (`PORT`, `SESSION_NAME`, `COMPANY_NAME`, `CLIENT_ID`).
pub fn apply_deployment_env(config: &mut Config) {
    apply_deployment_vars(config, |key| std::env::var(key).ok());
}

fn apply_deployment_vars(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) => config.gateway.port = p,
            Err(e) => tracing::warn!("ignoring invalid PORT '{}': {}", port, e),
        }
    }
    if let Some(name) = get("SESSION_NAME") {
        config.session.name = name;
    }
    if let Some(company) = get("COMPANY_NAME") {
        config.gateway.company_name = company;
    }
    if let Some(client_id) = get("CLIENT_ID") {
        config.gateway.client_id = client_id;
    }
}
