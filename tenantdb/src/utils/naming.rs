use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;

/// Tenant ids end up inside DDL, so only a conservative alphabet is accepted.
static TENANT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,47}$").expect("tenant id pattern is valid"));

/// Returns the normalized form of `tenant_id`, or `None` if it can't be used in a name.
pub fn normalize_tenant_id(tenant_id: &str) -> Option<String> {
    if !TENANT_ID_PATTERN.is_match(tenant_id) {
        return None;
    }
    Some(tenant_id.to_ascii_lowercase().replace('-', "_"))
}

/// `{prefix}_{tenant}`
pub fn database_name(prefix: &str, normalized_tenant: &str) -> String {
    format!("{}_{}", prefix, normalized_tenant)
}

/// `{prefix}_{tenant}_owner`
pub fn role_name(prefix: &str, normalized_tenant: &str) -> String {
    format!("{}_{}_owner", prefix, normalized_tenant)
}

pub fn generate_password(length: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(length).map(char::from).collect()
}

/// Double-quoted SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escapes LIKE wildcards so `value` is matched literally (escape char `\`).
pub fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
