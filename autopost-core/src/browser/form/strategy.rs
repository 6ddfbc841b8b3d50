use async_trait::async_trait;

use crate::browser::error::BrowserResult;

use super::field::{ControlKind, FieldSpec, FillContext};
use super::surface::{ControlHandle, FormSurface, Probe};

/// Outcome of a successful locate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    Control(ControlHandle),
    /// No direct control; the anchor gets clicked and the selection is
    /// driven with keystrokes.
    KeyboardAnchor(ControlHandle),
}

/// One rung of the locator ladder. Strategies are ordered from semantic to
/// fragile; each must return `None` rather than guess, so the chain only
/// advances past a rung when it genuinely had no unique answer.
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn locate(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        ctx: &FillContext,
    ) -> BrowserResult<Option<Located>>;
}

/// The standard ladder: accessible role/name, visible text anchor,
/// structural position, keyboard navigation.
pub fn default_chain() -> Vec<Box<dyn LocatorStrategy>> {
    vec![
        Box::new(RoleNameStrategy),
        Box::new(TextAnchorStrategy),
        Box::new(StructuralStrategy),
        Box::new(KeyboardStrategy),
    ]
}

pub struct RoleNameStrategy;

#[async_trait]
impl LocatorStrategy for RoleNameStrategy {
    fn name(&self) -> &'static str {
        "role-name"
    }

    async fn locate(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        _ctx: &FillContext,
    ) -> BrowserResult<Option<Located>> {
        let candidates = match spec.kind {
            ControlKind::FileInput => {
                surface
                    .probe(Probe::FileInput {
                        require_image_accept: true,
                    })
                    .await?
            }
            _ => {
                let names = spec.name_candidates();
                surface
                    .probe(Probe::Role {
                        names: &names,
                        kind: spec.kind,
                    })
                    .await?
            }
        };
        Ok(unique(candidates).map(Located::Control))
    }
}

pub struct TextAnchorStrategy;

#[async_trait]
impl LocatorStrategy for TextAnchorStrategy {
    fn name(&self) -> &'static str {
        "text-anchor"
    }

    async fn locate(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        _ctx: &FillContext,
    ) -> BrowserResult<Option<Located>> {
        if spec.kind == ControlKind::FileInput {
            return Ok(None);
        }
        for anchor in spec.anchor_texts() {
            let candidates = surface
                .probe(Probe::TextAnchor {
                    text: anchor,
                    kind: spec.kind,
                })
                .await?;
            if let Some(control) = unique(candidates) {
                return Ok(Some(Located::Control(control)));
            }
        }
        Ok(None)
    }
}

pub struct StructuralStrategy;

#[async_trait]
impl LocatorStrategy for StructuralStrategy {
    fn name(&self) -> &'static str {
        "structural"
    }

    async fn locate(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        ctx: &FillContext,
    ) -> BrowserResult<Option<Located>> {
        match spec.kind {
            ControlKind::TextInput => {
                if let Some(previous) = ctx.previous_value.as_deref().filter(|v| !v.is_empty()) {
                    let after = surface
                        .probe(Probe::EmptyTextInputAfterValue { value: previous })
                        .await?;
                    if let Some(control) = first(after) {
                        return Ok(Some(Located::Control(control)));
                    }
                }
                let below = surface
                    .probe(Probe::EmptyTextInputBelow {
                        y_threshold: ctx.header_y_threshold,
                    })
                    .await?;
                Ok(first(below).map(Located::Control))
            }
            ControlKind::TextArea => {
                let areas = surface.probe(Probe::EmptyTextArea).await?;
                Ok(first(areas).map(Located::Control))
            }
            ControlKind::FileInput => {
                let inputs = surface
                    .probe(Probe::FileInput {
                        require_image_accept: false,
                    })
                    .await?;
                Ok(first(inputs).map(Located::Control))
            }
            // Position says nothing useful about click-to-open dropdowns.
            ControlKind::Dropdown => Ok(None),
        }
    }
}

pub struct KeyboardStrategy;

#[async_trait]
impl LocatorStrategy for KeyboardStrategy {
    fn name(&self) -> &'static str {
        "keyboard"
    }

    async fn locate(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        _ctx: &FillContext,
    ) -> BrowserResult<Option<Located>> {
        if spec.kind != ControlKind::Dropdown {
            return Ok(None);
        }
        for anchor in spec.anchor_texts() {
            let candidates = surface.probe(Probe::VisibleText { text: anchor }).await?;
            if let Some(control) = first(candidates) {
                return Ok(Some(Located::KeyboardAnchor(control)));
            }
        }
        Ok(None)
    }
}

/// The unique-match rule: a strategy only wins with exactly one candidate.
fn unique(mut candidates: Vec<ControlHandle>) -> Option<ControlHandle> {
    if candidates.len() == 1 {
        candidates.pop()
    } else {
        None
    }
}

/// Structural and keyboard rungs are defined as "the first", so plurality
/// is resolved by page order instead of rejected.
fn first(candidates: Vec<ControlHandle>) -> Option<ControlHandle> {
    candidates.into_iter().next()
}
