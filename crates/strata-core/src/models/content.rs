use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Classification of ingested media, drives retention policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Livestream,
    Story,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [
        ContentType::Post,
        ContentType::Livestream,
        ContentType::Story,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Livestream => "livestream",
            ContentType::Story => "story",
        }
    }

    /// Top-level key prefix under which objects of this type are stored.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            ContentType::Post => "posts",
            ContentType::Livestream => "livestreams",
            ContentType::Story => "stories",
        }
    }
}

impl Display for ContentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "post" | "posts" => Ok(ContentType::Post),
            "livestream" | "livestreams" => Ok(ContentType::Livestream),
            "story" | "stories" => Ok(ContentType::Story),
            _ => Err(anyhow::anyhow!("Invalid content type: {}", s)),
        }
    }
}

/// Object-storage tier.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageClass {
    #[default]
    Standard,
    Archive,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::Archive => "ARCHIVE",
        }
    }
}

impl Display for StorageClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STANDARD" => Ok(StorageClass::Standard),
            "ARCHIVE" => Ok(StorageClass::Archive),
            _ => Err(anyhow::anyhow!("Invalid storage class: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_accepts_plural_forms() {
        assert_eq!("posts".parse::<ContentType>().unwrap(), ContentType::Post);
        assert_eq!("Story".parse::<ContentType>().unwrap(), ContentType::Story);
        assert!("reel".parse::<ContentType>().is_err());
    }

    #[test]
    fn storage_class_serializes_uppercase() {
        let json = serde_json::to_string(&StorageClass::Archive).unwrap();
        assert_eq!(json, "\"ARCHIVE\"");
    }
}
