//! Turns parsed modules into a [`Schema`]: references are checked, tag modes
//! resolved against each module's tagging environment, and CHOICE / SET /
//! SEQUENCE components checked for tag clashes the decoder couldn't resolve.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use thiserror::Error;

use crate::parser::{parse, ParseError};
use crate::types::{Alternatives, Components, Presence, Tag, TagMode, TaggingDefault, Type};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("couldn't parse schema: {0}")]
    Parse(#[from] ParseError),
    #[error("type {name} is defined twice in module {module}")]
    DuplicateType { module: String, name: String },
    #[error("type {name} references undefined type {missing}")]
    UndefinedType { name: String, missing: String },
    #[error("type {0} is defined in terms of itself")]
    CircularReference(String),
    #[error("{owner}: {first} and {second} can't be told apart (both match {tag})")]
    AmbiguousTags {
        owner: String,
        first: String,
        second: String,
        tag: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TagSet {
    Any,
    Tags(Vec<Tag>),
}

impl TagSet {
    fn clash(&self, other: &TagSet) -> Option<String> {
        match (self, other) {
            (TagSet::Any, _) | (_, TagSet::Any) => Some("any tag".to_string()),
            (TagSet::Tags(ours), TagSet::Tags(theirs)) => ours
                .iter()
                .find(|tag| theirs.contains(tag))
                .map(Tag::to_string),
        }
    }
}

/// A compiled set of type definitions, ready to decode BER against any of
/// its named types.
#[derive(Debug, Clone)]
pub struct Schema {
    pub(crate) types: HashMap<String, Type>,
    names: Vec<String>,
}

// definitions as parsed, before tag resolution
struct Definitions {
    defs: Vec<(String, Type, TaggingDefault)>,
    index: HashMap<String, usize>,
}

impl Definitions {
    fn get(&self, name: &str) -> Option<&Type> {
        self.index.get(name).map(|&i| &self.defs[i].1)
    }

    // CHOICE and ANY can only be tagged explicitly (X.680 31.2.7)
    fn is_untagged_choice_or_any(&self, ty: &Type, depth: usize) -> bool {
        match ty {
            Type::Choice(_) | Type::Any => true,
            Type::Reference(name) if depth < 64 => self
                .get(name)
                .is_some_and(|target| self.is_untagged_choice_or_any(target, depth + 1)),
            _ => false,
        }
    }

    fn check_references(&self, owner: &str, ty: &Type) -> Result<(), CompileError> {
        match ty {
            Type::Reference(name) if self.get(name).is_none() => {
                Err(CompileError::UndefinedType {
                    name: owner.to_string(),
                    missing: name.clone(),
                })
            }
            Type::Tagged { inner, .. } | Type::SequenceOf(inner) | Type::SetOf(inner) => {
                self.check_references(owner, inner)
            }
            Type::Sequence(c) | Type::Set(c) => c
                .components
                .iter()
                .try_for_each(|component| self.check_references(owner, &component.ty)),
            Type::Choice(a) => a
                .alternatives
                .iter()
                .try_for_each(|alternative| self.check_references(owner, &alternative.ty)),
            _ => Ok(()),
        }
    }

    fn apply_tagging(&self, ty: &Type, tagging: TaggingDefault) -> Type {
        match ty {
            Type::Tagged { tag, mode, inner } => {
                let mode = if self.is_untagged_choice_or_any(inner, 0) {
                    if *mode == TagMode::Implicit {
                        warn!("IMPLICIT tag {tag} on {} treated as EXPLICIT", inner.describe());
                    }
                    TagMode::Explicit
                } else {
                    match (mode, tagging) {
                        (TagMode::Unspecified, TaggingDefault::Explicit) => TagMode::Explicit,
                        (TagMode::Unspecified, _) => TagMode::Implicit,
                        (mode, _) => *mode,
                    }
                };
                Type::Tagged {
                    tag: *tag,
                    mode,
                    inner: Box::new(self.apply_tagging(inner, tagging)),
                }
            }
            Type::Sequence(c) => Type::Sequence(self.tag_components(c, tagging)),
            Type::Set(c) => Type::Set(self.tag_components(c, tagging)),
            Type::Choice(a) => Type::Choice(self.tag_alternatives(a, tagging)),
            Type::SequenceOf(element) => {
                Type::SequenceOf(Box::new(self.apply_tagging(element, tagging)))
            }
            Type::SetOf(element) => Type::SetOf(Box::new(self.apply_tagging(element, tagging))),
            other => other.clone(),
        }
    }

    fn tag_components(&self, c: &Components, tagging: TaggingDefault) -> Components {
        let automatic = tagging == TaggingDefault::Automatic
            && !c
                .components
                .iter()
                .any(|component| matches!(component.ty, Type::Tagged { .. }));
        let mut result = c.clone();
        for (i, component) in result.components.iter_mut().enumerate() {
            let ty = if automatic {
                auto_tag(i, &component.ty)
            } else {
                component.ty.clone()
            };
            component.ty = self.apply_tagging(&ty, tagging);
        }
        result
    }

    fn tag_alternatives(&self, a: &Alternatives, tagging: TaggingDefault) -> Alternatives {
        let automatic = tagging == TaggingDefault::Automatic
            && !a
                .alternatives
                .iter()
                .any(|alternative| matches!(alternative.ty, Type::Tagged { .. }));
        let mut result = a.clone();
        for (i, alternative) in result.alternatives.iter_mut().enumerate() {
            let ty = if automatic {
                auto_tag(i, &alternative.ty)
            } else {
                alternative.ty.clone()
            };
            alternative.ty = self.apply_tagging(&ty, tagging);
        }
        result
    }
}

fn auto_tag(position: usize, ty: &Type) -> Type {
    Type::Tagged {
        tag: Tag::context(position as u32),
        mode: TagMode::Unspecified,
        inner: Box::new(ty.clone()),
    }
}

impl Schema {
    pub fn compile(text: &str) -> Result<Self, CompileError> {
        let modules = parse(text)?;

        let mut definitions = Definitions {
            defs: Vec::new(),
            index: HashMap::new(),
        };
        for module in modules {
            let mut seen = HashSet::new();
            for assignment in module.assignments {
                if !seen.insert(assignment.name.clone()) {
                    return Err(CompileError::DuplicateType {
                        module: module.name,
                        name: assignment.name,
                    });
                }
                if definitions.index.contains_key(&assignment.name) {
                    warn!(
                        "{}.{} (line {}) is shadowed by an earlier definition",
                        module.name, assignment.name, assignment.line
                    );
                    continue;
                }
                definitions
                    .index
                    .insert(assignment.name.clone(), definitions.defs.len());
                definitions
                    .defs
                    .push((assignment.name, assignment.ty, module.tagging));
            }
        }

        for (name, ty, _) in &definitions.defs {
            definitions.check_references(name, ty)?;
        }

        let mut types = HashMap::with_capacity(definitions.defs.len());
        let mut names = Vec::with_capacity(definitions.defs.len());
        for (name, ty, tagging) in &definitions.defs {
            types.insert(name.clone(), definitions.apply_tagging(ty, *tagging));
            names.push(name.clone());
        }

        let schema = Schema { types, names };
        for name in &schema.names {
            if let Some(ty) = schema.types.get(name) {
                schema.tags_of(ty, &mut vec![name.clone()])?;
                schema.check_tags(name, ty)?;
            }
        }
        debug!("compiled {} type definitions", schema.names.len());
        Ok(schema)
    }

    /// Type names in declaration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    // the tags a value of `ty` can start with; fails on reference loops
    // that never pass through a tag
    pub(crate) fn tags_of(
        &self,
        ty: &Type,
        visiting: &mut Vec<String>,
    ) -> Result<TagSet, CompileError> {
        match ty {
            Type::Tagged { tag, .. } => Ok(TagSet::Tags(vec![*tag])),
            Type::Any => Ok(TagSet::Any),
            Type::Reference(name) => {
                if visiting.contains(name) {
                    return Err(CompileError::CircularReference(name.clone()));
                }
                let target = self.types.get(name).ok_or_else(|| CompileError::UndefinedType {
                    name: visiting.last().cloned().unwrap_or_default(),
                    missing: name.clone(),
                })?;
                visiting.push(name.clone());
                let tags = self.tags_of(target, visiting);
                visiting.pop();
                tags
            }
            Type::Choice(a) => {
                let mut tags = Vec::new();
                for alternative in &a.alternatives {
                    match self.tags_of(&alternative.ty, visiting)? {
                        TagSet::Any => return Ok(TagSet::Any),
                        TagSet::Tags(t) => tags.extend(t),
                    }
                }
                Ok(TagSet::Tags(tags))
            }
            builtin => Ok(TagSet::Tags(builtin.universal_tag().into_iter().collect())),
        }
    }

    fn check_tags(&self, owner: &str, ty: &Type) -> Result<(), CompileError> {
        match ty {
            Type::Tagged { inner, .. } | Type::SequenceOf(inner) | Type::SetOf(inner) => {
                self.check_tags(owner, inner)
            }
            Type::Sequence(c) => {
                for component in &c.components {
                    self.check_tags(owner, &component.ty)?;
                }
                // an absent OPTIONAL component must not be mistaken for
                // whatever follows it
                for (i, component) in c.components.iter().enumerate() {
                    if component.presence == Presence::Required {
                        continue;
                    }
                    for next in &c.components[i + 1..] {
                        self.check_distinct(owner, component.as_pair(), next.as_pair())?;
                        if next.presence == Presence::Required {
                            break;
                        }
                    }
                }
                Ok(())
            }
            Type::Set(c) => {
                for component in &c.components {
                    self.check_tags(owner, &component.ty)?;
                }
                for (i, first) in c.components.iter().enumerate() {
                    for second in &c.components[i + 1..] {
                        self.check_distinct(owner, first.as_pair(), second.as_pair())?;
                    }
                }
                Ok(())
            }
            Type::Choice(a) => {
                for alternative in &a.alternatives {
                    self.check_tags(owner, &alternative.ty)?;
                }
                for (i, first) in a.alternatives.iter().enumerate() {
                    for second in &a.alternatives[i + 1..] {
                        self.check_distinct(owner, first.as_pair(), second.as_pair())?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_distinct(
        &self,
        owner: &str,
        (first, first_ty): (&str, &Type),
        (second, second_ty): (&str, &Type),
    ) -> Result<(), CompileError> {
        let ours = self.tags_of(first_ty, &mut Vec::new())?;
        let theirs = self.tags_of(second_ty, &mut Vec::new())?;
        match ours.clash(&theirs) {
            Some(tag) => Err(CompileError::AmbiguousTags {
                owner: owner.to_string(),
                first: first.to_string(),
                second: second.to_string(),
                tag,
            }),
            None => Ok(()),
        }
    }
}
