//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses this module to create the shared SQLx pool and enforce schema
//! migrations before accepting API traffic. Every tenant shares one schema;
//! isolation is by `tenant_id` on every owned row.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

/// True when the error is a unique-constraint violation (`23505`).
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, "23505")
}

/// True when the error is an exclusion-constraint violation (`23P01`).
#[must_use]
pub fn is_exclusion_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, "23P01")
}

/// True when the error is a foreign-key violation (`23503`).
#[must_use]
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, "23503")
}

fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(code),
        _ => false,
    }
}

/// A TEXT column held a value no enum variant matches.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declare a fieldless enum stored as a TEXT column.
///
/// Generates `as_str`, `parse`, `Display`, serde with the given names, and
/// `TryFrom<String>` so rows can use `#[sqlx(try_from = "String")]`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::db::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value).ok_or_else(|| $crate::db::UnknownVariant { kind: stringify!($name), value })
            }
        }
    };
}

pub(crate) use text_enum;

#[cfg(test)]
mod tests {
    use super::*;

    text_enum! {
        /// Test-only enum.
        pub enum Light { Red => "red", Amber => "amber_light" }
    }

    #[test]
    fn text_enum_round_trips_names() {
        assert_eq!(Light::Amber.as_str(), "amber_light");
        assert_eq!(Light::parse("red"), Some(Light::Red));
        assert_eq!(Light::parse("RED"), None);
        assert_eq!(serde_json::to_value(Light::Amber).unwrap(), "amber_light");
        assert_eq!(Light::Red.to_string(), "red");
    }

    #[test]
    fn text_enum_try_from_reports_kind() {
        let err = Light::try_from("blue".to_owned()).unwrap_err();
        assert_eq!(err.to_string(), "unknown Light: blue");
    }

    #[test]
    fn sqlstate_helpers_ignore_non_database_errors() {
        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
        assert!(!is_exclusion_violation(&err));
        assert!(!is_foreign_key_violation(&err));
    }
}
