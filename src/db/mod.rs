pub mod account;
pub mod migrator;
pub mod provisioner;
pub mod registry;

/// Quotes a PostgreSQL identifier: wraps it in double quotes and doubles any
/// embedded quote so the name can never terminate the identifier early.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
