use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_DB_NAME_LEN: usize = 63;

/// Login owning a tenant. The password arrives in plaintext and is hashed
/// before it reaches the tenant database.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientSpec {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for ClientSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSpec")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSpec {
    pub name: String,
    #[serde(alias = "dbName")]
    pub db_name: String,
    #[serde(default, alias = "owningClient")]
    pub client: Option<ClientSpec>,
}

impl TenantSpec {
    /// Builds a validated spec. Specs deserialized from a catalog feed must
    /// go through [`TenantSpec::validate`] before use.
    pub fn new(
        name: impl Into<String>,
        db_name: impl Into<String>,
        client: Option<ClientSpec>,
    ) -> Result<Self, ValidationError> {
        let spec = Self {
            name: name.into(),
            db_name: db_name.into(),
            client,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyTenantName);
        }
        validate_db_name(&self.db_name)
    }
}

/// Event emitted by the tenant catalog once the tenant record is durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCreated {
    pub tenant: TenantSpec,
}

/// Rejects database names that cannot be used verbatim as a PostgreSQL
/// identifier. Quoting still happens at the SQL layer.
pub fn validate_db_name(db_name: &str) -> Result<(), ValidationError> {
    if db_name.is_empty() {
        return Err(ValidationError::EmptyDatabaseName);
    }
    if db_name.chars().any(char::is_whitespace) {
        return Err(ValidationError::Whitespace(db_name.to_string()));
    }
    if let Some(ch) = db_name
        .chars()
        .find(|c| c.is_control() || matches!(c, '"' | '\'' | '`' | ';' | '\\'))
    {
        return Err(ValidationError::UnsafeCharacter {
            db_name: db_name.to_string(),
            ch,
        });
    }
    if db_name.len() > MAX_DB_NAME_LEN {
        return Err(ValidationError::TooLong {
            db_name: db_name.to_string(),
            len: db_name.len(),
            max: MAX_DB_NAME_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_name_with_space_is_rejected() {
        let err = TenantSpec::new("acme", "bad name", None).unwrap_err();
        assert_eq!(err, ValidationError::Whitespace("bad name".into()));

        for name in ["a b", " leading", "trailing ", "tab\tname", "new\nline"] {
            assert!(
                matches!(validate_db_name(name), Err(ValidationError::Whitespace(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unsafe_characters_are_rejected() {
        for name in ["acme\"db", "acme;drop", "o'brien", "back\\slash", "nul\0"] {
            assert!(
                matches!(
                    validate_db_name(name),
                    Err(ValidationError::UnsafeCharacter { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_length_and_emptiness() {
        assert_eq!(validate_db_name(""), Err(ValidationError::EmptyDatabaseName));
        assert!(validate_db_name(&"a".repeat(MAX_DB_NAME_LEN)).is_ok());
        assert!(matches!(
            validate_db_name(&"a".repeat(MAX_DB_NAME_LEN + 1)),
            Err(ValidationError::TooLong { len: 64, .. })
        ));
        assert_eq!(
            TenantSpec::new("  ", "acme_db", None).unwrap_err(),
            ValidationError::EmptyTenantName
        );
    }

    #[test]
    fn test_valid_names_pass() {
        for name in ["acme_db", "Acme-2024", "tenant.v2", "données"] {
            assert!(validate_db_name(name).is_ok(), "{name:?} should be accepted");
        }
    }

    #[test]
    fn test_deserialize_catalog_payload() {
        let spec: TenantSpec = serde_json::from_str(
            r#"{"name":"acme","dbName":"acme_db","owningClient":
                {"username":"root","email":"root@acme.test","password":"secret"}}"#,
        )
        .unwrap();
        assert_eq!(spec.db_name, "acme_db");
        assert_eq!(spec.client.as_ref().unwrap().username, "root");
        assert!(spec.validate().is_ok());

        let serialized = serde_json::to_string(&spec).unwrap();
        assert!(!serialized.contains("secret"));
        assert!(!format!("{spec:?}").contains("secret"));
    }
}
