//! Channel edit node.
//!
//! An edit replaces some of a channel's metadata. Edits never change the group
//! id; the effective metadata is the genesis overlaid with every edit applied
//! in `(created_at, hash)` order, so replicas that hold the same edits agree on
//! the result regardless of arrival order. Edits are signed by the channel's
//! admin key.

use crate::channel::group::{check_description, check_name, check_thumbnail, ChannelGenesis};
use crate::channel::types::{current_timestamp_millis, ContentHash, Image, NodeType};
use crate::error::{ChansyncError, Result};
use crate::identity::{Keyring, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The content of a channel edit that gets signed and hashed.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelEditContent {
    /// Node type discriminator (always ChannelEdit).
    pub node_type: NodeType,
    /// Group id of the edited channel.
    pub group_id: ContentHash,
    /// Replacement name, if changed.
    pub name: Option<String>,
    /// Replacement description, if changed.
    pub description: Option<String>,
    /// Replacement image, if changed.
    pub thumbnail: Option<Image>,
    /// Creation timestamp in milliseconds.
    pub created_at: u64,
}

impl fmt::Debug for ChannelEditContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEditContent")
            .field("group_id", &self.group_id)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl ChannelEditContent {
    /// Creates new edit content.
    ///
    /// # Errors
    /// Returns a validation error if the edit changes nothing or any new value
    /// breaks the channel metadata limits.
    pub fn new(
        group_id: ContentHash,
        name: Option<String>,
        description: Option<String>,
        thumbnail: Option<Image>,
    ) -> Result<Self> {
        if name.is_none() && description.is_none() && thumbnail.is_none() {
            return Err(ChansyncError::validation("Channel edit changes nothing"));
        }
        if let Some(name) = &name {
            check_name(name)?;
        }
        if let Some(description) = &description {
            check_description(description)?;
        }
        check_thumbnail(thumbnail.as_ref())?;

        Ok(Self {
            node_type: NodeType::ChannelEdit,
            group_id,
            name,
            description,
            thumbnail,
            created_at: current_timestamp_millis(),
        })
    }

    /// Computes the content hash of this edit.
    pub fn content_hash(&self) -> Result<ContentHash> {
        ContentHash::compute(self)
    }
}

/// A signed channel edit.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelEdit {
    /// The signed content of this node.
    pub content: ChannelEditContent,
    /// Admin key signature over the content hash.
    pub signature: Signature,
    /// Content hash - the edit id.
    pub content_hash: ContentHash,
}

impl fmt::Debug for ChannelEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEdit")
            .field("group_id", &self.content.group_id)
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

impl ChannelEdit {
    /// Signs edit content with the channel's admin key.
    ///
    /// Fails with a permission error if the keyring does not hold the admin key.
    pub fn create(
        content: ChannelEditContent,
        genesis: &ChannelGenesis,
        keyring: &dyn Keyring,
    ) -> Result<Self> {
        let content_hash = content.content_hash()?;
        let signature = keyring.sign(&genesis.admin_key().id(), &content_hash)?;

        Ok(Self {
            content,
            signature,
            content_hash,
        })
    }

    /// Verifies the content hash and the admin signature against the genesis.
    pub fn verify(&self, genesis: &ChannelGenesis) -> Result<()> {
        if self.content.group_id != *genesis.hash() {
            return Err(ChansyncError::validation(
                "Channel edit targets a different channel",
            ));
        }

        let computed_hash = self.content.content_hash()?;
        if computed_hash != self.content_hash {
            return Err(ChansyncError::validation("Channel edit content hash mismatch"));
        }

        genesis
            .admin_key()
            .verify(&self.content_hash, &self.signature)
    }

    /// Returns the edited channel's group id.
    pub fn group_id(&self) -> &ContentHash {
        &self.content.group_id
    }

    /// Returns the creation timestamp in milliseconds.
    pub fn created_at(&self) -> u64 {
        self.content.created_at
    }

    /// Returns the content hash (edit id).
    pub fn hash(&self) -> &ContentHash {
        &self.content_hash
    }
}

/// Channel metadata after all known edits are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveMetadata {
    pub name: String,
    pub description: String,
    pub thumbnail: Option<Image>,
    /// `1 + number of applied edits`.
    pub version: u32,
    /// Timestamp of the latest applied edit, or of the genesis.
    pub updated_at: u64,
}

impl EffectiveMetadata {
    /// Folds edits over the genesis. Edits must already be sorted by
    /// `(created_at, hash)`.
    pub fn resolve<'a>(
        genesis: &ChannelGenesis,
        edits: impl IntoIterator<Item = &'a ChannelEdit>,
    ) -> Self {
        let mut meta = Self {
            name: genesis.content.name.clone(),
            description: genesis.content.description.clone(),
            thumbnail: genesis.content.thumbnail.clone(),
            version: 1,
            updated_at: genesis.created_at(),
        };

        for edit in edits {
            if let Some(name) = &edit.content.name {
                meta.name = name.clone();
            }
            if let Some(description) = &edit.content.description {
                meta.description = description.clone();
            }
            if let Some(thumbnail) = &edit.content.thumbnail {
                meta.thumbnail = (!thumbnail.is_empty()).then(|| thumbnail.clone());
            }
            meta.version += 1;
            meta.updated_at = meta.updated_at.max(edit.created_at());
        }

        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::group::{ChannelGenesisContent, ChannelKeys};
    use crate::channel::types::CircleType;
    use crate::identity::{KeyRole, LocalKeyring};

    fn create_channel(keyring: &LocalKeyring) -> ChannelGenesis {
        let keys = ChannelKeys {
            admin: keyring.generate_key(KeyRole::ChannelAdmin).unwrap(),
            publish: keyring.generate_key(KeyRole::ChannelPublish).unwrap(),
        };
        let content = ChannelGenesisContent::new(
            "Original".to_string(),
            "First description".to_string(),
            None,
            None,
            CircleType::Public,
            None,
            keys,
        )
        .unwrap();
        ChannelGenesis::create(content, keyring).expect("Failed to create channel")
    }

    #[test]
    fn test_edit_create_and_verify() {
        let keyring = LocalKeyring::new();
        let genesis = create_channel(&keyring);

        let content =
            ChannelEditContent::new(*genesis.hash(), Some("Renamed".to_string()), None, None)
                .unwrap();
        let edit = ChannelEdit::create(content, &genesis, &keyring).unwrap();

        edit.verify(&genesis).expect("Edit verification failed");
        assert_eq!(edit.group_id(), genesis.hash());
    }

    #[test]
    fn test_edit_without_admin_key_is_permission_error() {
        let owner = LocalKeyring::new();
        let genesis = create_channel(&owner);
        let stranger = LocalKeyring::new();

        let content =
            ChannelEditContent::new(*genesis.hash(), Some("Mine now".to_string()), None, None)
                .unwrap();
        let result = ChannelEdit::create(content, &genesis, &stranger);
        assert!(matches!(result, Err(ChansyncError::Permission(_))));
    }

    #[test]
    fn test_empty_edit_rejected() {
        let result = ChannelEditContent::new(ContentHash::zero(), None, None, None);
        assert!(matches!(result, Err(ChansyncError::Validation(_))));
    }

    #[test]
    fn test_effective_metadata_applies_edits_in_order() {
        let keyring = LocalKeyring::new();
        let genesis = create_channel(&keyring);

        let mut first =
            ChannelEditContent::new(*genesis.hash(), Some("Second".to_string()), None, None)
                .unwrap();
        first.created_at = genesis.created_at() + 10;
        let mut second = ChannelEditContent::new(
            *genesis.hash(),
            Some("Third".to_string()),
            Some("New description".to_string()),
            None,
        )
        .unwrap();
        second.created_at = genesis.created_at() + 20;

        let first = ChannelEdit::create(first, &genesis, &keyring).unwrap();
        let second = ChannelEdit::create(second, &genesis, &keyring).unwrap();

        let meta = EffectiveMetadata::resolve(&genesis, [&first, &second]);
        assert_eq!(meta.name, "Third");
        assert_eq!(meta.description, "New description");
        assert_eq!(meta.version, 3);
        assert_eq!(meta.updated_at, genesis.created_at() + 20);
    }
}
