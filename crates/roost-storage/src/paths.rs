//! Shared key layout for staging and permanent objects.
//!
//! Staging: `temp/{sessionId}/{category}/{entityId|new}/{imageGuid}/{variant}`
//! Permanent: `{category}/{entityId}/{variant}/{imageGuid}.{ext}`

use roost_core::constants::{STAGING_PREFIX, UNASSIGNED_ENTITY_SEGMENT};
use roost_core::{EntityId, ImageCategory, Variant};
use uuid::Uuid;

use crate::{StorageError, StorageResult};

/// Reject keys that could escape a storage root.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.contains("..") || storage_key.starts_with('/') || storage_key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Prefix holding everything staged for one session.
pub fn session_prefix(session_id: &str) -> String {
    format!("{}/{}/", STAGING_PREFIX, session_id)
}

/// Prefix every staging object lives under.
pub fn staging_root() -> String {
    format!("{}/", STAGING_PREFIX)
}

/// Base path a staged image's variants are written under.
pub fn staging_base(
    session_id: &str,
    category: ImageCategory,
    entity_id: Option<EntityId>,
    image_guid: Uuid,
) -> String {
    let entity_segment = entity_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| UNASSIGNED_ENTITY_SEGMENT.to_string());
    format!(
        "{}{}/{}/{}",
        session_prefix(session_id),
        category,
        entity_segment,
        image_guid
    )
}

pub fn staging_variant_key(staging_base: &str, variant: Variant) -> String {
    format!("{}/{}", staging_base.trim_end_matches('/'), variant)
}

pub fn permanent_key(
    category: ImageCategory,
    entity_id: EntityId,
    variant: Variant,
    image_guid: Uuid,
    extension: &str,
) -> String {
    format!(
        "{}/{}/{}/{}.{}",
        category, entity_id, variant, image_guid, extension
    )
}

/// Parts of a permanent key, if `storage_key` has that layout.
pub fn parse_permanent_key(storage_key: &str) -> Option<(ImageCategory, EntityId, Variant, Uuid)> {
    let mut segments = storage_key.split('/');
    let category = segments.next()?.parse::<ImageCategory>().ok()?;
    let entity_id = segments.next()?.parse::<EntityId>().ok()?;
    let variant = segments.next()?.parse::<Variant>().ok()?;
    let (guid, _extension) = segments.next()?.split_once('.')?;
    let guid = Uuid::parse_str(guid).ok()?;
    if segments.next().is_some() {
        return None;
    }
    Some((category, entity_id, variant, guid))
}

/// Recover the variant from the last segment of a staging key or the
/// directory segment of a permanent key.
pub fn variant_of(storage_key: &str) -> Option<Variant> {
    let mut segments = storage_key.rsplit('/');
    let last = segments.next()?;
    if let Ok(variant) = last.parse::<Variant>() {
        return Some(variant);
    }
    segments.next().and_then(|dir| dir.parse::<Variant>().ok())
}
