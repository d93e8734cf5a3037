use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

use crate::constants::{CANONICAL_IMAGE_EXTENSION, LARGE_SIZE, MEDIUM_SIZE, THUMBNAIL_SIZE};

/// Primary key of a domain entity (property, unit, ticket, contract).
pub type EntityId = i64;

/// Surrogate key of a permanent image row.
pub type ImageId = i64;

/// Kind of domain entity an image can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "entity_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Property,
    Unit,
    MaintenanceTicket,
    Contract,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Property,
        EntityType::Unit,
        EntityType::MaintenanceTicket,
        EntityType::Contract,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Property => "property",
            EntityType::Unit => "unit",
            EntityType::MaintenanceTicket => "maintenance_ticket",
            EntityType::Contract => "contract",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "property" => Ok(EntityType::Property),
            "unit" => Ok(EntityType::Unit),
            "maintenance_ticket" => Ok(EntityType::MaintenanceTicket),
            "contract" => Ok(EntityType::Contract),
            _ => Err(anyhow::anyhow!("Invalid entity type: {}", s)),
        }
    }
}

/// Business category of an image within an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "image_category", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    Gallery,
    FloorPlan,
    LeaseDocument,
    OwnershipDocument,
}

impl ImageCategory {
    pub const ALL: [ImageCategory; 4] = [
        ImageCategory::Gallery,
        ImageCategory::FloorPlan,
        ImageCategory::LeaseDocument,
        ImageCategory::OwnershipDocument,
    ];

    /// Path segment used in staging and permanent keys.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageCategory::Gallery => "gallery",
            ImageCategory::FloorPlan => "floor_plan",
            ImageCategory::LeaseDocument => "lease_document",
            ImageCategory::OwnershipDocument => "ownership_document",
        }
    }
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Invalid image category: {}", s))
    }
}

/// Resolution-specific rendition of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Original,
    Large,
    Medium,
    Thumbnail,
}

impl Variant {
    pub const RASTER_SET: [Variant; 4] = [
        Variant::Original,
        Variant::Large,
        Variant::Medium,
        Variant::Thumbnail,
    ];

    pub const DOCUMENT_SET: [Variant; 1] = [Variant::Original];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::Large => "large",
            Variant::Medium => "medium",
            Variant::Thumbnail => "thumbnail",
        }
    }

    /// Fixed crop size for derived variants; `None` for `Original`.
    pub fn crop_size(self) -> Option<(u32, u32)> {
        match self {
            Variant::Original => None,
            Variant::Large => Some(LARGE_SIZE),
            Variant::Medium => Some(MEDIUM_SIZE),
            Variant::Thumbnail => Some(THUMBNAIL_SIZE),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::RASTER_SET
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Invalid variant: {}", s))
    }
}

/// Upload MIME types the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeKind {
    Jpeg,
    Png,
    Webp,
    Gif,
    Pdf,
}

impl MimeKind {
    pub fn parse(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(MimeKind::Jpeg),
            "image/png" => Some(MimeKind::Png),
            "image/webp" => Some(MimeKind::Webp),
            "image/gif" => Some(MimeKind::Gif),
            "application/pdf" => Some(MimeKind::Pdf),
            _ => None,
        }
    }

    pub fn as_mime(self) -> &'static str {
        match self {
            MimeKind::Jpeg => "image/jpeg",
            MimeKind::Png => "image/png",
            MimeKind::Webp => "image/webp",
            MimeKind::Gif => "image/gif",
            MimeKind::Pdf => "application/pdf",
        }
    }

    pub fn is_document(self) -> bool {
        matches!(self, MimeKind::Pdf)
    }

    /// Variants that must exist for a staged file of this kind.
    pub fn required_variants(self) -> &'static [Variant] {
        if self.is_document() {
            &Variant::DOCUMENT_SET
        } else {
            &Variant::RASTER_SET
        }
    }

    /// Extension of the stored (post-transcode) file.
    pub fn stored_extension(self) -> &'static str {
        match self {
            MimeKind::Pdf => "pdf",
            _ => CANONICAL_IMAGE_EXTENSION,
        }
    }
}

/// Reference to a domain entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// The set of active images sharing (entity type, entity id, category).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub category: ImageCategory,
}

impl Partition {
    pub fn new(entity: EntityRef, category: ImageCategory) -> Self {
        Self {
            entity_type: entity.entity_type,
            entity_id: entity.entity_id,
            category,
        }
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_id)
    }

    /// Stable string key, used for advisory locks and in-memory lock maps.
    pub fn lock_key(&self) -> String {
        format!("{}:{}:{}", self.entity_type, self.entity_id, self.category)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity_type, self.entity_id, self.category)
    }
}

/// Descriptor of an upload that has been transcoded and written to staging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedImage {
    pub image_id: Uuid,
    pub session_id: String,
    pub category: ImageCategory,
    pub mime_type: String,
    pub original_file_name: String,
    pub file_size_bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Entity the upload was staged for, when it already existed.
    pub target_entity_id: Option<EntityId>,
    /// Prefix the variants were written under (`.../{imageGuid}`).
    pub staging_base: String,
    pub created_at: DateTime<Utc>,
}

impl StagedImage {
    pub fn mime_kind(&self) -> Option<MimeKind> {
        MimeKind::parse(&self.mime_type)
    }

    pub fn required_variants(&self) -> &'static [Variant] {
        self.mime_kind()
            .map(MimeKind::required_variants)
            .unwrap_or(&Variant::RASTER_SET)
    }
}

/// Durable metadata row for a migrated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct PermanentImageRecord {
    pub image_id: ImageId,
    pub image_guid: Uuid,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub category: ImageCategory,
    pub mime_type: String,
    pub original_file_name: String,
    pub stored_path: String,
    pub file_size_bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub display_order: Option<i32>,
    pub is_active: bool,
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub concurrency_token: Uuid,
}

impl PermanentImageRecord {
    pub fn partition(&self) -> Partition {
        Partition {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            category: self.category,
        }
    }
}

/// Insert payload for [`PermanentImageRecord`]; the store assigns ids and tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImageRecord {
    pub image_guid: Uuid,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub category: ImageCategory,
    pub mime_type: String,
    pub original_file_name: String,
    pub stored_path: String,
    pub file_size_bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub uploaded_by: Option<String>,
}

/// Concurrency control used by the display order engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingStrategy {
    /// Token-guarded writes with bounded whole-batch retry.
    #[default]
    Optimistic,
    /// Exclusive partition lock held for the read-modify-write.
    Pessimistic,
    /// Unguarded last-writer-wins writes.
    #[serde(rename = "none")]
    Unlocked,
}

impl FromStr for OrderingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimistic" => Ok(OrderingStrategy::Optimistic),
            "pessimistic" => Ok(OrderingStrategy::Pessimistic),
            "none" | "unlocked" => Ok(OrderingStrategy::Unlocked),
            _ => Err(anyhow::anyhow!("Invalid ordering strategy: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_kind_parse() {
        assert_eq!(MimeKind::parse("image/jpeg"), Some(MimeKind::Jpeg));
        assert_eq!(MimeKind::parse("IMAGE/JPG"), Some(MimeKind::Jpeg));
        assert_eq!(
            MimeKind::parse("application/pdf; charset=binary"),
            Some(MimeKind::Pdf)
        );
        assert_eq!(MimeKind::parse("text/plain"), None);
    }

    #[test]
    fn test_required_variants_by_mime() {
        assert_eq!(MimeKind::Pdf.required_variants().len(), 1);
        assert_eq!(MimeKind::Jpeg.required_variants().len(), 4);
        assert_eq!(MimeKind::Png.required_variants().len(), 4);
        assert_eq!(MimeKind::Pdf.required_variants()[0], Variant::Original);
    }

    #[test]
    fn test_category_round_trip_through_path_segment() {
        for category in ImageCategory::ALL {
            assert_eq!(category.as_str().parse::<ImageCategory>().unwrap(), category);
        }
        assert!("kitchen".parse::<ImageCategory>().is_err());
    }

    #[test]
    fn test_ordering_strategy_parse() {
        assert_eq!(
            "none".parse::<OrderingStrategy>().unwrap(),
            OrderingStrategy::Unlocked
        );
        assert_eq!(
            "Pessimistic".parse::<OrderingStrategy>().unwrap(),
            OrderingStrategy::Pessimistic
        );
        assert!("lock-free".parse::<OrderingStrategy>().is_err());
    }

    #[test]
    fn test_partition_lock_key_is_stable() {
        let partition = Partition::new(
            EntityRef::new(EntityType::Property, 42),
            ImageCategory::Gallery,
        );
        assert_eq!(partition.lock_key(), "property:42:gallery");
        assert_eq!(partition.to_string(), "property/42/gallery");
    }
}
