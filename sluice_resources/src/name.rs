//! Type-safe resource identifiers.
//!
//! This module provides a macro to generate identifier types that prevent
//! mixing up databases, schemas, pipes and channels, and that keep the
//! hierarchy between them. Fully qualified names are dot separated, for
//! example `MY_DATABASE.MY_SCHEMA.MY_PIPE.MY_CHANNEL`.

use snafu::Snafu;

/// Maximum length of a single identifier.
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Errors that can occur when parsing resource names.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ResourceError {
    #[snafu(display("invalid {kind} name format: expected '{expected}' but got '{actual}'"))]
    InvalidFormat {
        kind: &'static str,
        expected: String,
        actual: String,
    },
    #[snafu(display(
        "invalid {kind} identifier: '{id}' - must be 1 to 255 characters long, start with a letter or underscore, and contain only letters, numbers, underscores, dollar signs and hyphens"
    ))]
    InvalidIdentifier { kind: &'static str, id: String },
}

pub type ResourceResult<T, E = ResourceError> = ::std::result::Result<T, E>;

/// Validate an identifier according to the ingestion service naming rules.
///
/// Valid identifiers must:
/// - Be between 1 and [`MAX_IDENTIFIER_LEN`] characters long
/// - Start with an ASCII letter or an underscore
/// - Contain only ASCII letters, digits, underscores (_), dollar signs ($) and hyphens (-)
pub fn validate_identifier(kind: &'static str, id: &str) -> ResourceResult<()> {
    let invalid = || ResourceError::InvalidIdentifier {
        kind,
        id: id.to_string(),
    };

    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid());
    }

    let mut chars = id.chars();

    if let Some(first_char) = chars.next() {
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(invalid());
        }
    }

    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '$' && ch != '-' {
            return Err(invalid());
        }
    }

    Ok(())
}

#[doc(hidden)]
pub mod __private {
    pub use paste;
    pub use serde;
}

/// Macro to generate type-safe resource types.
///
/// Root resources only have an id. Child resources carry their parent and
/// render as `{parent}.{id}`.
#[macro_export]
macro_rules! resource_type {
    // Root resource (no parent)
    ($name:ident, $kind:literal) => {
        $crate::name::__private::paste::paste! {
            #[doc = "Type-safe identifier for a " $kind "."]
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct [<$name Name>] {
                /// The resource ID.
                pub id: String,
            }

            impl [<$name Name>] {
                #[doc = "Create a new " $kind " identifier."]
                pub fn new(id: impl Into<String>) -> $crate::name::ResourceResult<Self> {
                    let id = id.into();
                    $crate::name::validate_identifier($kind, &id)?;
                    Ok(Self { id })
                }

                #[doc = "Create a new " $kind " identifier without validation."]
                #[doc = ""]
                #[doc = "# Panics"]
                #[doc = ""]
                #[doc = "Panics if the identifier is invalid."]
                pub fn new_unchecked(id: impl Into<String>) -> Self {
                    let id = id.into();
                    $crate::name::validate_identifier($kind, &id)
                        .expect("resource id must be valid");
                    Self { id }
                }

                #[doc = "Get the fully qualified name."]
                pub fn name(&self) -> String {
                    self.id.clone()
                }

                #[doc = "Parse a fully qualified name into a " $kind " identifier."]
                pub fn parse(name: &str) -> $crate::name::ResourceResult<Self> {
                    if name.contains('.') {
                        return Err($crate::name::ResourceError::InvalidFormat {
                            kind: $kind,
                            expected: "{id}".to_string(),
                            actual: name.to_string(),
                        });
                    }

                    $crate::name::validate_identifier($kind, name)?;
                    Ok(Self { id: name.to_string() })
                }

                #[doc = "Get the resource ID."]
                pub fn id(&self) -> &str {
                    &self.id
                }
            }

            $crate::resource_type!(@common [<$name Name>]);
        }
    };

    // Child resource (with parent)
    ($name:ident, $kind:literal, $parent:ident) => {
        $crate::name::__private::paste::paste! {
            #[doc = "Type-safe identifier for a " $kind "."]
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct [<$name Name>] {
                /// The parent resource.
                pub parent: [<$parent Name>],
                /// The resource ID.
                pub id: String,
            }

            impl [<$name Name>] {
                #[doc = "Create a new " $kind " identifier."]
                pub fn new(id: impl Into<String>, parent: [<$parent Name>]) -> $crate::name::ResourceResult<Self> {
                    let id = id.into();
                    $crate::name::validate_identifier($kind, &id)?;
                    Ok(Self { id, parent })
                }

                #[doc = "Create a new " $kind " identifier without validation."]
                #[doc = ""]
                #[doc = "# Panics"]
                #[doc = ""]
                #[doc = "Panics if the identifier is invalid."]
                pub fn new_unchecked(id: impl Into<String>, parent: [<$parent Name>]) -> Self {
                    let id = id.into();
                    $crate::name::validate_identifier($kind, &id)
                        .expect("resource id must be valid");
                    Self { id, parent }
                }

                #[doc = "Get the fully qualified name."]
                pub fn name(&self) -> String {
                    format!("{}.{}", self.parent.name(), self.id)
                }

                #[doc = "Parse a fully qualified name into a " $kind " identifier."]
                pub fn parse(name: &str) -> $crate::name::ResourceResult<Self> {
                    let Some((parent_name, id)) = name.rsplit_once('.') else {
                        return Err($crate::name::ResourceError::InvalidFormat {
                            kind: $kind,
                            expected: "{parent}.{id}".to_string(),
                            actual: name.to_string(),
                        });
                    };

                    $crate::name::validate_identifier($kind, id)?;
                    let parent = [<$parent Name>]::parse(parent_name).map_err(|_| {
                        $crate::name::ResourceError::InvalidFormat {
                            kind: $kind,
                            expected: "{parent}.{id}".to_string(),
                            actual: name.to_string(),
                        }
                    })?;

                    Ok(Self { id: id.to_string(), parent })
                }

                #[doc = "Get the resource ID."]
                pub fn id(&self) -> &str {
                    &self.id
                }

                #[doc = "Get the parent resource."]
                pub fn parent(&self) -> &[<$parent Name>] {
                    &self.parent
                }
            }

            $crate::resource_type!(@common [<$name Name>]);
        }
    };

    (@common $ty:ident) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.name())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::name::ResourceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl $crate::name::__private::serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: $crate::name::__private::serde::Serializer,
            {
                serializer.serialize_str(&self.name())
            }
        }

        impl<'de> $crate::name::__private::serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: $crate::name::__private::serde::Deserializer<'de>,
            {
                let name = <String as $crate::name::__private::serde::Deserialize>::deserialize(
                    deserializer,
                )?;
                Self::parse(&name).map_err(<D::Error as $crate::name::__private::serde::de::Error>::custom)
            }
        }
    };
}

resource_type!(Client, "client");
resource_type!(Database, "database");
resource_type!(Schema, "schema", Database);
resource_type!(Pipe, "pipe", Schema);
resource_type!(Channel, "channel", Pipe);

impl PipeName {
    /// Create a pipe name from its database, schema and pipe identifiers.
    pub fn from_parts(
        database: impl Into<String>,
        schema: impl Into<String>,
        pipe: impl Into<String>,
    ) -> ResourceResult<Self> {
        let database = DatabaseName::new(database)?;
        let schema = SchemaName::new(schema, database)?;
        PipeName::new(pipe, schema)
    }

    /// Returns the database this pipe belongs to.
    pub fn database(&self) -> &DatabaseName {
        &self.parent.parent
    }

    /// Returns the schema this pipe belongs to.
    pub fn schema(&self) -> &SchemaName {
        &self.parent
    }
}

impl ChannelName {
    /// Returns the pipe this channel writes to.
    pub fn pipe(&self) -> &PipeName {
        &self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_name() {
        let database = DatabaseName::new("MY_DATABASE").unwrap();
        assert_eq!(database.id(), "MY_DATABASE");
        assert_eq!(database.name(), "MY_DATABASE");
        assert_eq!(database.to_string(), "MY_DATABASE");

        let parsed = DatabaseName::parse("MY_DATABASE").unwrap();
        assert_eq!(parsed, database);

        let from_str: DatabaseName = "MY_DATABASE".parse().unwrap();
        assert_eq!(from_str, database);
    }

    #[test]
    fn test_pipe_name() {
        let pipe = PipeName::from_parts("MY_DATABASE", "MY_SCHEMA", "MY_PIPE").unwrap();

        assert_eq!(pipe.id(), "MY_PIPE");
        assert_eq!(pipe.schema().id(), "MY_SCHEMA");
        assert_eq!(pipe.database().id(), "MY_DATABASE");
        assert_eq!(pipe.to_string(), "MY_DATABASE.MY_SCHEMA.MY_PIPE");

        let parsed = PipeName::parse("MY_DATABASE.MY_SCHEMA.MY_PIPE").unwrap();
        assert_eq!(parsed, pipe);
    }

    #[test]
    fn test_channel_name() {
        let pipe = PipeName::from_parts("db", "public", "events").unwrap();
        let channel =
            ChannelName::new_unchecked("MY_CHANNEL_01J9Z3-abc", pipe.clone());

        assert_eq!(channel.id(), "MY_CHANNEL_01J9Z3-abc");
        assert_eq!(channel.pipe(), &pipe);
        assert_eq!(channel.to_string(), "db.public.events.MY_CHANNEL_01J9Z3-abc");

        let parsed = ChannelName::parse("db.public.events.MY_CHANNEL_01J9Z3-abc").unwrap();
        assert_eq!(parsed, channel);
    }

    #[test]
    fn test_parsing_errors() {
        let result = DatabaseName::parse("db.schema");
        assert!(matches!(result, Err(ResourceError::InvalidFormat { .. })));

        let result = SchemaName::parse("schema");
        assert!(matches!(result, Err(ResourceError::InvalidFormat { .. })));

        let result = PipeName::parse("db.schema");
        assert!(matches!(result, Err(ResourceError::InvalidFormat { .. })));

        let result = ChannelName::parse("db..pipe.channel");
        assert!(matches!(result, Err(ResourceError::InvalidFormat { .. })));

        let result = ChannelName::parse("db.schema.pipe.9channel");
        assert!(matches!(
            result,
            Err(ResourceError::InvalidIdentifier { kind: "channel", .. })
        ));
    }

    #[test]
    fn test_identifier_validation() {
        assert!(ClientName::new("a").is_ok());
        assert!(ClientName::new("_private").is_ok());
        assert!(ClientName::new("MY_CLIENT_01J9Z3").is_ok());
        assert!(ClientName::new("client-1$x").is_ok());

        for invalid in ["", "1client", "-client", "my client", "my.client", "clé"] {
            let result = ClientName::new(invalid);
            assert!(
                matches!(result, Err(ResourceError::InvalidIdentifier { .. })),
                "expected {invalid:?} to be rejected"
            );
        }

        let too_long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(ClientName::new(too_long).is_err());
    }

    #[test]
    #[should_panic(expected = "resource id must be valid")]
    fn test_new_unchecked_panics_on_invalid_id() {
        DatabaseName::new_unchecked("1db");
    }

    #[test]
    fn test_serde_uses_qualified_name() {
        let pipe = PipeName::from_parts("db", "public", "events").unwrap();
        let channel = ChannelName::new_unchecked("ch", pipe);

        let json = serde_json::to_string(&channel).unwrap();
        assert_eq!(json, "\"db.public.events.ch\"");

        let decoded: ChannelName = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, channel);

        let err = serde_json::from_str::<ChannelName>("\"db.events\"");
        assert!(err.is_err());
    }
}
