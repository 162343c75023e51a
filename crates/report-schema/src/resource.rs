//! Fleet resources: containers (registry repositories) and their items (images).

use serde::{Deserialize, Serialize};

/// A named collection of items, e.g. a registry repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Name, unique within the fleet at scan time.
    pub name: String,
    /// Provider-specific locator (repository URI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: None,
        }
    }
}

/// A unit that may carry a scan result, e.g. a tagged image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Name of the owning container.
    pub container_name: String,
    /// Opaque identifier: the tag for tagged images, otherwise the digest.
    pub item_id: String,
    /// Content digest, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Tag, when the item is tagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Item {
    pub fn new(container_name: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            item_id: item_id.into(),
            digest: None,
            tag: None,
        }
    }

    /// Build an item from a registry image id. The tag wins as `item_id`.
    /// Returns `None` when the image has neither tag nor digest.
    pub fn from_image(
        container_name: impl Into<String>,
        digest: Option<String>,
        tag: Option<String>,
    ) -> Option<Self> {
        let item_id = tag.clone().or_else(|| digest.clone())?;
        Some(Self {
            container_name: container_name.into(),
            item_id,
            digest,
            tag,
        })
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Identifier of the form `container:item`.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.container_name, self.item_id)
    }
}
