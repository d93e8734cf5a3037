pub mod image;
pub mod migration;
pub mod policy;

pub use image::{
    EntityId, EntityRef, EntityType, ImageCategory, ImageId, MimeKind, NewImageRecord,
    OrderingStrategy, Partition, PermanentImageRecord, StagedImage, Variant,
};
pub use migration::{FailedItem, MigrationSession, MigrationStatus};
pub use policy::{CategoryPolicies, CategoryPolicy, PersistKind, PolicyError};
