//! Category policy table
//!
//! Each [`ImageCategory`] maps to exactly one [`CategoryPolicy`] describing
//! which MIME types it accepts and how a migrated upload is persisted. The
//! table is checked once when it is built; callers then look policies up
//! without re-validating.

use std::collections::HashMap;

use super::image::{ImageCategory, MimeKind, Variant};

/// How a migrated upload is attached to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistKind {
    /// One ordered row per image in the category's partition.
    Gallery,
    /// A single descriptor slot on the entity; the latest upload replaces it.
    Descriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPolicy {
    pub category: ImageCategory,
    pub persist: PersistKind,
    pub allowed: Vec<MimeKind>,
}

impl CategoryPolicy {
    pub fn accepts(&self, mime: MimeKind) -> bool {
        self.allowed.contains(&mime)
    }

    /// Variants that must be present for a file of `mime` in this category.
    pub fn required_variants(&self, mime: MimeKind) -> &'static [Variant] {
        mime.required_variants()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Category {0} has more than one policy")]
    Duplicate(ImageCategory),

    #[error("Category {0} has no policy")]
    Missing(ImageCategory),

    #[error("Category {0} accepts no MIME types")]
    EmptyMimeSet(ImageCategory),

    #[error("Gallery category {0} cannot accept documents")]
    DocumentInGallery(ImageCategory),
}

/// Validated lookup table from category to policy.
#[derive(Debug, Clone)]
pub struct CategoryPolicies {
    by_category: HashMap<ImageCategory, CategoryPolicy>,
}

impl CategoryPolicies {
    pub fn new(policies: Vec<CategoryPolicy>) -> Result<Self, PolicyError> {
        let mut by_category = HashMap::with_capacity(policies.len());
        for policy in policies {
            if policy.allowed.is_empty() {
                return Err(PolicyError::EmptyMimeSet(policy.category));
            }
            if policy.persist == PersistKind::Gallery
                && policy.allowed.iter().any(|m| m.is_document())
            {
                return Err(PolicyError::DocumentInGallery(policy.category));
            }
            let category = policy.category;
            if by_category.insert(category, policy).is_some() {
                return Err(PolicyError::Duplicate(category));
            }
        }
        for category in ImageCategory::ALL {
            if !by_category.contains_key(&category) {
                return Err(PolicyError::Missing(category));
            }
        }
        Ok(Self { by_category })
    }

    /// The marketplace defaults: photo galleries and floor plans are ordered
    /// raster sets, lease and ownership paperwork is a single descriptor.
    pub fn standard() -> Self {
        let raster = vec![MimeKind::Jpeg, MimeKind::Png, MimeKind::Webp, MimeKind::Gif];
        let mut paperwork = raster.clone();
        paperwork.push(MimeKind::Pdf);

        let table = vec![
            CategoryPolicy {
                category: ImageCategory::Gallery,
                persist: PersistKind::Gallery,
                allowed: raster.clone(),
            },
            CategoryPolicy {
                category: ImageCategory::FloorPlan,
                persist: PersistKind::Gallery,
                allowed: raster,
            },
            CategoryPolicy {
                category: ImageCategory::LeaseDocument,
                persist: PersistKind::Descriptor,
                allowed: paperwork.clone(),
            },
            CategoryPolicy {
                category: ImageCategory::OwnershipDocument,
                persist: PersistKind::Descriptor,
                allowed: paperwork,
            },
        ];

        match Self::new(table) {
            Ok(policies) => policies,
            Err(e) => unreachable!("standard category policy table is invalid: {e}"),
        }
    }

    pub fn get(&self, category: ImageCategory) -> &CategoryPolicy {
        // Construction guarantees every category is present.
        &self.by_category[&category]
    }
}

impl Default for CategoryPolicies {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_covers_every_category() {
        let policies = CategoryPolicies::standard();
        for category in ImageCategory::ALL {
            assert_eq!(policies.get(category).category, category);
        }
        assert_eq!(
            policies.get(ImageCategory::Gallery).persist,
            PersistKind::Gallery
        );
        assert_eq!(
            policies.get(ImageCategory::LeaseDocument).persist,
            PersistKind::Descriptor
        );
        assert!(!policies.get(ImageCategory::Gallery).accepts(MimeKind::Pdf));
        assert!(policies
            .get(ImageCategory::LeaseDocument)
            .accepts(MimeKind::Pdf));
    }

    #[test]
    fn test_missing_category_rejected() {
        let result = CategoryPolicies::new(vec![CategoryPolicy {
            category: ImageCategory::Gallery,
            persist: PersistKind::Gallery,
            allowed: vec![MimeKind::Jpeg],
        }]);
        assert!(matches!(result, Err(PolicyError::Missing(_))));
    }

    #[test]
    fn test_document_in_gallery_rejected() {
        let result = CategoryPolicies::new(vec![CategoryPolicy {
            category: ImageCategory::Gallery,
            persist: PersistKind::Gallery,
            allowed: vec![MimeKind::Pdf],
        }]);
        assert_eq!(
            result.unwrap_err(),
            PolicyError::DocumentInGallery(ImageCategory::Gallery)
        );
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let gallery = CategoryPolicy {
            category: ImageCategory::Gallery,
            persist: PersistKind::Gallery,
            allowed: vec![MimeKind::Jpeg],
        };
        let result = CategoryPolicies::new(vec![gallery.clone(), gallery]);
        assert_eq!(
            result.unwrap_err(),
            PolicyError::Duplicate(ImageCategory::Gallery)
        );
    }
}
