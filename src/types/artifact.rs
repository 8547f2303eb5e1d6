// ABOUTME: Artifact reference parsing and validation.
// ABOUTME: Handles formats like app-image, app-image:1.4.2, ami-0abc1234.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseArtifactRefError {
    #[error("artifact reference cannot be empty")]
    Empty,

    #[error("invalid character in artifact reference: {0}")]
    InvalidChar(char),

    #[error("artifact version cannot be empty")]
    EmptyVersion,
}

/// A reference to the machine image or bundle a fleet launches from.
///
/// `name[:version]`: the version is optional and carried verbatim; fleet
/// backends that encode the version in the name (AMI-style IDs) just use the
/// name part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    name: String,
    version: Option<String>,
}

impl ArtifactRef {
    pub fn parse(input: &str) -> Result<Self, ParseArtifactRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseArtifactRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric() && c != '/' && c != ':' && c != '.' && c != '-' && c != '_'
            {
                return Err(ParseArtifactRefError::InvalidChar(c));
            }
        }

        match input.split_once(':') {
            Some((_, "")) => Err(ParseArtifactRefError::EmptyVersion),
            Some((name, version)) => Ok(Self {
                name: name.to_string(),
                version: Some(version.to_string()),
            }),
            None => Ok(Self {
                name: input.to_string(),
                version: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref version) = self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

impl Serialize for ArtifactRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArtifactRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}
