use crate::error::Error;
use crate::models::from_unix_nanos;
use derive_more::Display;
use serde::Serialize;
use time::OffsetDateTime;

/// Whether a provider offers the bulk-update capability.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    /// Never asked, or re-detection was requested.
    #[default]
    #[display("unknown")]
    Unknown,
    #[display("supported")]
    Supported,
    /// The provider said no. Only an explicit refusal gets a provider here.
    #[display("unsupported")]
    Unsupported,
}
impl Support {
    pub(crate) fn from_column(value: Option<bool>) -> Self {
        match value {
            None => Self::Unknown,
            Some(true) => Self::Supported,
            Some(false) => Self::Unsupported,
        }
    }

    pub(crate) fn to_column(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Supported => Some(true),
            Self::Unsupported => Some(false),
        }
    }
}

/// What is known about one provider's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityRecord {
    pub provider: String,
    pub support: Support,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
}
impl CapabilityRecord {
    pub fn unknown(provider: impl Into<String>) -> Self {
        Self { provider: provider.into(), support: Support::Unknown, last_checked: None }
    }

    pub fn with_support(mut self, support: Support, checked: OffsetDateTime) -> Self {
        self.support = support;
        self.last_checked = Some(checked);
        self
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CapabilityRow {
    pub provider_name: String,
    pub supports_bulk: Option<bool>,
    pub last_checked: Option<i64>,
}
impl TryFrom<CapabilityRow> for CapabilityRecord {
    type Error = Error;
    fn try_from(row: CapabilityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            provider: row.provider_name,
            support: Support::from_column(row.supports_bulk),
            last_checked: row.last_checked.map(|t| from_unix_nanos(t, "capability last_checked")).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Support::Unknown, None)]
    #[case(Support::Supported, Some(true))]
    #[case(Support::Unsupported, Some(false))]
    fn test_column_mapping(#[case] support: Support, #[case] column: Option<bool>) {
        assert_eq!(support.to_column(), column);
        assert_eq!(Support::from_column(column), support);
    }
}
