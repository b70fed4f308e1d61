//! Group reference parsing and validation
//!
//! Implements the reference format accepted on the command line: KIND:ID

use crate::GroupKind;
use std::fmt;
use std::str::FromStr;

/// Reference to a mix, album or playlist using format KIND:ID
///
/// The kind is case-insensitive and normalized to lowercase. The id is kept
/// verbatim because remote ids (hex mix ids, playlist UUIDs) are case-sensitive.
///
/// # Examples
///
/// ```
/// use mix_downloader::identifier::GroupRef;
/// use mix_downloader::GroupKind;
///
/// let group = GroupRef::parse("MIX:0123456789abcdef").unwrap();
/// assert_eq!(group.kind(), GroupKind::Mix);
/// assert_eq!(group.id(), "0123456789abcdef");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupRef {
    kind: GroupKind,
    id: String,
}

impl GroupRef {
    /// Build a reference from its parts, validating the id
    pub fn new(kind: GroupKind, id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self { kind, id })
    }

    /// Parse a reference string into a GroupRef
    ///
    /// # Format
    ///
    /// `KIND:ID` where KIND is one of `mix`, `album`, `playlist`.
    ///
    /// # Errors
    ///
    /// Returns an error if the format is invalid, the kind is unknown or the id
    /// contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let (kind, id) = s.trim().split_once(':').ok_or_else(|| {
            IdentifierError::InvalidFormat(
                "invalid group reference format: expected KIND:ID".to_string(),
            )
        })?;

        let kind = GroupKind::from_str(kind).map_err(IdentifierError::UnknownKind)?;
        Self::new(kind, id.trim())
    }

    /// Get the group kind
    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    /// Get the remote group id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Convert the reference to a filesystem-safe name
    ///
    /// # Examples
    ///
    /// ```
    /// use mix_downloader::identifier::GroupRef;
    ///
    /// let group = GroupRef::parse("album:77646168").unwrap();
    /// assert_eq!(group.to_filesystem_safe(), "album_77646168");
    /// ```
    pub fn to_filesystem_safe(&self) -> String {
        format!("{}_{}", self.kind, self.id)
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for GroupRef {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_id(id: &str) -> Result<(), IdentifierError> {
    if id.is_empty() {
        return Err(IdentifierError::InvalidFormat(
            "id component cannot be empty".to_string(),
        ));
    }

    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(IdentifierError::InvalidFormat(format!(
            "id contains unsupported character {bad:?}"
        )));
    }

    Ok(())
}

/// Errors that can occur during group reference parsing
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    /// Invalid reference format
    #[error("identifier error: {0}")]
    InvalidFormat(String),

    /// Kind component is not mix, album or playlist
    #[error("identifier error: {0}")]
    UnknownKind(String),
}
