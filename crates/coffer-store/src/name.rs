use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The closed set of documents Coffer persists.
///
/// Every persisted dataset has exactly one entry here. Keeping the set closed
/// means a caller-supplied name can never be turned into an arbitrary path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentName {
    Inventories,
    Bounties,
    Profiles,
    Territories,
    Cooldowns,
}

impl DocumentName {
    /// Every allow-listed document.
    pub const ALL: [DocumentName; 5] = [
        DocumentName::Inventories,
        DocumentName::Bounties,
        DocumentName::Profiles,
        DocumentName::Territories,
        DocumentName::Cooldowns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inventories => "inventories",
            Self::Bounties => "bounties",
            Self::Profiles => "profiles",
            Self::Territories => "territories",
            Self::Cooldowns => "cooldowns",
        }
    }

    /// File name inside the data directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for DocumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentName {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_document_name(s)
    }
}

/// Resolve a caller-supplied name against the allow-list.
///
/// Accepts either the bare name (`"bounties"`) or its file name
/// (`"bounties.json"`). Anything else, including paths, is rejected.
///
/// # Examples
///
/// ```
/// use coffer_store::{validate_document_name, DocumentName};
///
/// assert_eq!(validate_document_name("bounties.json").unwrap(), DocumentName::Bounties);
/// assert!(validate_document_name("../etc/passwd").is_err());
/// ```
pub fn validate_document_name(name: &str) -> StoreResult<DocumentName> {
    let bare = name.strip_suffix(".json").unwrap_or(name);
    DocumentName::ALL
        .into_iter()
        .find(|doc| doc.as_str() == bare)
        .ok_or_else(|| StoreError::InvalidDocumentName(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_file_names() {
        for doc in DocumentName::ALL {
            assert_eq!(validate_document_name(doc.as_str()).unwrap(), doc);
            assert_eq!(validate_document_name(&doc.file_name()).unwrap(), doc);
        }
    }

    #[test]
    fn rejects_traversal_and_unknown_names() {
        for bad in [
            "",
            ".json",
            "../inventories.json",
            "inventories/../../x",
            "/etc/passwd",
            "Inventories",
            "inventories.json.bak",
            "secrets.json",
        ] {
            let err = validate_document_name(bad).unwrap_err();
            assert!(err.is_validation(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&DocumentName::Territories).unwrap();
        assert_eq!(json, "\"territories\"");
        let back: DocumentName = serde_json::from_str("\"cooldowns\"").unwrap();
        assert_eq!(back, DocumentName::Cooldowns);
    }
}
