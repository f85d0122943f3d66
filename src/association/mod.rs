//! Association Enumerator
//!
//! A relationship class is a [`Relation`]: its endpoint classes and roles,
//! the candidate objects on the left, the counterparts of one left object
//! and an optional payload. [`Association`] turns any relation into an
//! [`AssociationSource`] with enumeration, re-validating lookup and
//! reference queries from either side.
//!
//! Records are recomputed on every call and carry no identity.

pub mod relations;

pub use relations::*;

use crate::dispatch::ProviderContext;
use crate::domain::name::InstanceName;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One instance of a relationship class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociationRecord {
    pub class_name: &'static str,
    pub left_role: &'static str,
    pub left: InstanceName,
    pub right_role: &'static str,
    pub right: InstanceName,
    /// Non-key properties; empty when keys only were requested
    pub properties: BTreeMap<String, Option<String>>,
}

/// Lazy sequence of records
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<AssociationRecord>> + 'a>;

// =============================================================================
// AssociationSource Port
// =============================================================================

/// A relationship class as seen by the dispatch table
pub trait AssociationSource: Send + Sync {
    fn class_name(&self) -> &'static str;

    /// Every record of the class
    fn enumerate<'a>(&'a self, ctx: &'a ProviderContext, keys_only: bool) -> Result<RecordIter<'a>>;

    /// The record joining two objects, after checking the relation still holds
    fn get(&self, ctx: &ProviderContext, left: &InstanceName, right: &InstanceName) -> Result<AssociationRecord>;

    /// Records referencing an object; `None` when the object cannot take part
    /// in this class or the hint names a class not on the opposite side
    fn references_for<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        object: &InstanceName,
        opposite_class: Option<&str>,
    ) -> Option<Result<RecordIter<'a>>>;
}

pub type AssociationSourceRef = Arc<dyn AssociationSource>;

// =============================================================================
// Relation
// =============================================================================

/// Hooks a relationship class supplies to the generic engine
pub trait Relation: Send + Sync {
    /// Object on the left side
    type Left: Clone + Send + Sync + 'static;
    /// Object on the right side
    type Right: Clone + Send + Sync + 'static;

    fn class_name(&self) -> &'static str;
    fn left_role(&self) -> &'static str;
    fn right_role(&self) -> &'static str;
    fn left_classes(&self) -> Vec<&str>;
    fn right_classes(&self) -> Vec<&str>;

    /// Candidate left objects
    fn sources(&self, ctx: &ProviderContext) -> Result<Vec<Self::Left>>;

    /// Counterparts of one left object
    fn targets(&self, ctx: &ProviderContext, left: &Self::Left) -> Result<Vec<Self::Right>>;

    fn left_name(&self, ctx: &ProviderContext, left: &Self::Left) -> Result<InstanceName>;
    fn right_name(&self, ctx: &ProviderContext, right: &Self::Right) -> Result<InstanceName>;

    fn resolve_left(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Self::Left>>;
    fn resolve_right(&self, ctx: &ProviderContext, name: &InstanceName) -> Result<Option<Self::Right>>;

    /// Left objects related to a right object; scans every source unless overridden
    fn sources_for(&self, ctx: &ProviderContext, right: &Self::Right) -> Result<Vec<Self::Left>> {
        let wanted = self.right_name(ctx, right)?;
        let mut related = Vec::new();
        for left in self.sources(ctx)? {
            for target in self.targets(ctx, &left)? {
                if self.right_name(ctx, &target)? == wanted {
                    related.push(left.clone());
                    break;
                }
            }
        }
        Ok(related)
    }

    /// Non-key properties of a record
    fn payload(
        &self,
        _ctx: &ProviderContext,
        _left: &Self::Left,
        _right: &Self::Right,
    ) -> Result<BTreeMap<String, Option<String>>> {
        Ok(BTreeMap::new())
    }
}

fn is_one_of(name: &InstanceName, classes: &[&str]) -> bool {
    classes.iter().any(|class| name.is_class(class))
}

fn hint_allows(hint: Option<&str>, classes: &[&str]) -> bool {
    hint.map_or(true, |hint| classes.iter().any(|class| class.eq_ignore_ascii_case(hint)))
}

/// Generic association engine over a relation
#[derive(Debug, Default, Clone)]
pub struct Association<R> {
    relation: R,
}

impl<R: Relation> Association<R> {
    pub fn new(relation: R) -> Self {
        Self { relation }
    }

    pub fn relation(&self) -> &R {
        &self.relation
    }

    fn record(
        &self,
        ctx: &ProviderContext,
        left: &R::Left,
        right: &R::Right,
        keys_only: bool,
    ) -> Result<AssociationRecord> {
        let properties = if keys_only {
            BTreeMap::new()
        } else {
            self.relation.payload(ctx, left, right)?
        };
        Ok(AssociationRecord {
            class_name: self.relation.class_name(),
            left_role: self.relation.left_role(),
            left: self.relation.left_name(ctx, left)?,
            right_role: self.relation.right_role(),
            right: self.relation.right_name(ctx, right)?,
            properties,
        })
    }

    /// Records of one left object, computed lazily
    fn records_of<'a>(&'a self, ctx: &'a ProviderContext, left: R::Left, keys_only: bool) -> RecordIter<'a> {
        match self.relation.targets(ctx, &left) {
            Ok(targets) => Box::new(
                targets
                    .into_iter()
                    .map(move |right| self.record(ctx, &left, &right, keys_only)),
            ),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn not_found(&self, name: &InstanceName) -> Error {
        Error::NotFound(format!("{} endpoint {}", self.relation.class_name(), name))
    }
}

impl<R: Relation + 'static> AssociationSource for Association<R> {
    fn class_name(&self) -> &'static str {
        self.relation.class_name()
    }

    fn enumerate<'a>(&'a self, ctx: &'a ProviderContext, keys_only: bool) -> Result<RecordIter<'a>> {
        let sources = self.relation.sources(ctx)?;
        debug!(
            "Enumerating {} over {} sources",
            self.relation.class_name(),
            sources.len()
        );
        Ok(Box::new(
            sources
                .into_iter()
                .flat_map(move |left| self.records_of(ctx, left, keys_only)),
        ))
    }

    fn get(&self, ctx: &ProviderContext, left: &InstanceName, right: &InstanceName) -> Result<AssociationRecord> {
        if !is_one_of(left, &self.relation.left_classes()) {
            return Err(self.not_found(left));
        }
        if !is_one_of(right, &self.relation.right_classes()) {
            return Err(self.not_found(right));
        }

        let left_object = self
            .relation
            .resolve_left(ctx, left)?
            .ok_or_else(|| self.not_found(left))?;
        self.relation
            .resolve_right(ctx, right)?
            .ok_or_else(|| self.not_found(right))?;

        // The relation must still hold: the right side has to be one of the
        // left object's current counterparts
        for target in self.relation.targets(ctx, &left_object)? {
            if self.relation.right_name(ctx, &target)? == *right {
                return self.record(ctx, &left_object, &target, false);
            }
        }

        Err(Error::NotAssociated {
            class_name: self.relation.class_name().to_string(),
            left: left.to_string(),
            right: right.to_string(),
        })
    }

    fn references_for<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        object: &InstanceName,
        opposite_class: Option<&str>,
    ) -> Option<Result<RecordIter<'a>>> {
        let relation = &self.relation;

        if is_one_of(object, &relation.left_classes()) && hint_allows(opposite_class, &relation.right_classes()) {
            let left = match relation.resolve_left(ctx, object) {
                Ok(Some(left)) => left,
                Ok(None) => return Some(Err(self.not_found(object))),
                Err(e) => return Some(Err(e)),
            };
            return Some(Ok(self.records_of(ctx, left, false)));
        }

        if is_one_of(object, &relation.right_classes()) && hint_allows(opposite_class, &relation.left_classes()) {
            let right = match relation.resolve_right(ctx, object) {
                Ok(Some(right)) => right,
                Ok(None) => return Some(Err(self.not_found(object))),
                Err(e) => return Some(Err(e)),
            };
            return Some(relation.sources_for(ctx, &right).map(|lefts| -> RecordIter<'a> {
                Box::new(
                    lefts
                        .into_iter()
                        .map(move |left| self.record(ctx, &left, &right, false)),
                )
            }));
        }

        None
    }
}
