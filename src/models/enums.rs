use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        $(#[$meta])*
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    EntryStatus {
        Required => "REQUIRED",
        NotRequired => "NOT_REQUIRED",
        Keyed => "KEYED",
    }
);

str_enum!(
    #[serde(rename_all = "snake_case")]
    MetadataCategory {
        Crf => "crf",
        Requisition => "requisition",
    }
);

str_enum!(
    #[serde(rename_all = "snake_case")]
    ChangeType {
        Created => "created",
        Updated => "updated",
        Deleted => "deleted",
    }
);

impl Default for EntryStatus {
    fn default() -> Self {
        Self::Required
    }
}

impl EntryStatus {
    /// Anything that is not explicitly waived counts as required.
    pub fn is_required(&self) -> bool {
        *self != Self::NotRequired
    }
}

impl MetadataCategory {
    pub const ALL: [MetadataCategory; 2] = [Self::Crf, Self::Requisition];

    /// Ledger table backing this category.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Crf => "crf_metadata",
            Self::Requisition => "requisition_metadata",
        }
    }

    /// Prefix used when rendering a row, e.g. `CrfMeta app.crfone 1000.0 ...`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Crf => "CrfMeta",
            Self::Requisition => "RequisitionMeta",
        }
    }
}
