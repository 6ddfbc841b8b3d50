use tracing::{debug, trace};

use crate::browser::error::{BrowserError, BrowserResult};
use crate::config::FormSection;

use super::field::{FieldSpec, FieldValue, FillContext, ListingForm, LogicalField};
use super::strategy::{default_chain, Located, LocatorStrategy};
use super::surface::{FormSurface, Probe};

const DROPDOWN_KEY_SEQUENCE: [&str; 3] = ["Home", "ArrowDown", "Enter"];

/// Fills a marketplace listing form field by field. Location goes through
/// the strategy ladder; filling dispatches on the control kind. A field
/// either ends up filled or the whole attempt fails loudly.
pub struct FormFiller {
    strategies: Vec<Box<dyn LocatorStrategy>>,
    form: FormSection,
}

impl FormFiller {
    pub fn new(form: FormSection) -> Self {
        Self {
            strategies: default_chain(),
            form,
        }
    }

    pub fn with_strategies(form: FormSection, strategies: Vec<Box<dyn LocatorStrategy>>) -> Self {
        Self { strategies, form }
    }

    /// Fills every field of the form in the fixed order. A listing without
    /// an image simply skips the upload slot.
    pub async fn fill_form(
        &self,
        surface: &mut dyn FormSurface,
        values: &ListingForm,
    ) -> BrowserResult<()> {
        let mut ctx = FillContext {
            previous_value: None,
            header_y_threshold: self.form.header_y_threshold_px,
        };
        for field in LogicalField::fill_order() {
            let Some(value) = values.value_for(field) else {
                continue;
            };
            self.fill_field(surface, &field.spec(), &value, &mut ctx)
                .await?;
        }
        Ok(())
    }

    pub async fn fill_field(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        value: &FieldValue,
        ctx: &mut FillContext,
    ) -> BrowserResult<()> {
        let located = self.locate(surface, spec, ctx).await?;
        match (located, value) {
            (Located::Control(control), FieldValue::Text(text)) => {
                surface.fill_text(&control, text).await?;
                ctx.previous_value = Some(text.clone());
            }
            (Located::Control(control), FieldValue::OptionChoice(option)) => {
                surface.click(&control).await?;
                surface.settle(self.form.dropdown_settle_ms).await?;
                self.select_option(surface, option).await?;
            }
            (Located::Control(control), FieldValue::File(path)) => {
                surface.set_files(&control, path).await?;
            }
            (Located::KeyboardAnchor(anchor), FieldValue::OptionChoice(_)) => {
                surface.click(&anchor).await?;
                surface.settle(self.form.dropdown_settle_ms).await?;
                surface.press_keys(&DROPDOWN_KEY_SEQUENCE).await?;
            }
            _ => {
                return Err(BrowserError::Unexpected(format!(
                    "field '{}' resolved to an incompatible control",
                    spec.field
                )));
            }
        }
        surface.settle(self.form.settle_ms).await?;
        Ok(())
    }

    async fn locate(
        &self,
        surface: &mut dyn FormSurface,
        spec: &FieldSpec,
        ctx: &FillContext,
    ) -> BrowserResult<Located> {
        for strategy in &self.strategies {
            trace!(field = %spec.field, strategy = strategy.name(), "trying locator strategy");
            if let Some(located) = strategy.locate(surface, spec, ctx).await? {
                debug!(field = %spec.field, strategy = strategy.name(), "field located");
                return Ok(located);
            }
        }
        Err(BrowserError::FieldNotFound(spec.field.to_string()))
    }

    /// Picks an option inside an open dropdown: accessible role first, then
    /// exact text, then keyboard as the last resort.
    async fn select_option(
        &self,
        surface: &mut dyn FormSurface,
        option: &str,
    ) -> BrowserResult<()> {
        let by_role = surface.probe(Probe::RoleOption { name: option }).await?;
        if let Some(control) = by_role.into_iter().next() {
            surface.click(&control).await?;
            return Ok(());
        }
        let by_text = surface.probe(Probe::VisibleText { text: option }).await?;
        if let Some(control) = by_text.into_iter().next() {
            surface.click(&control).await?;
            return Ok(());
        }
        surface.press_keys(&DROPDOWN_KEY_SEQUENCE).await
    }

    /// Clicks the confirmation buttons in order ("Next", then "Publish").
    pub async fn confirm(
        &self,
        surface: &mut dyn FormSurface,
        labels: &[String],
    ) -> BrowserResult<()> {
        for label in labels {
            let candidates = surface.probe(Probe::VisibleText { text: label }).await?;
            let Some(control) = candidates.into_iter().next() else {
                return Err(BrowserError::PublishConfirmation(format!(
                    "button '{label}' not found"
                )));
            };
            surface.click(&control).await.map_err(|err| {
                BrowserError::PublishConfirmation(format!("button '{label}': {err}"))
            })?;
            surface.settle(self.form.settle_ms).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::super::testing::MockSurface;
    use super::*;

    fn form_section() -> FormSection {
        FormSection {
            header_y_threshold_px: 100.0,
            settle_ms: 0,
            dropdown_settle_ms: 0,
        }
    }

    fn sample_form() -> ListingForm {
        ListingForm {
            title: "Mid-century armchair".into(),
            price: "120".into(),
            description: "Solid teak, reupholstered.".into(),
            image: Some(PathBuf::from("/tmp/chair.jpg")),
            category: "Furniture".into(),
            condition: "New".into(),
            availability: "In stock".into(),
        }
    }

    #[tokio::test]
    async fn strategies_run_in_declared_order() {
        let filler = FormFiller::new(form_section());
        let mut surface = MockSurface::new();
        // Only the positional heuristic can answer: the earlier rungs must
        // still be attempted, and first.
        surface.respond("structural:empty-below", 3);
        let mut ctx = FillContext {
            previous_value: None,
            header_y_threshold: 100.0,
        };
        filler
            .fill_field(
                &mut surface,
                &LogicalField::Title.spec(),
                &FieldValue::Text("Desk".into()),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            surface.probes,
            vec![
                "role:title".to_string(),
                "text-anchor:Title".to_string(),
                "structural:empty-below".to_string(),
            ]
        );
        assert_eq!(surface.actions, vec!["fill:structural:empty-below#0=Desk"]);
        assert_eq!(ctx.previous_value.as_deref(), Some("Desk"));
    }

    #[tokio::test]
    async fn exhausted_ladder_raises_field_not_found() {
        let filler = FormFiller::new(form_section());
        let mut surface = MockSurface::new();
        let mut ctx = FillContext {
            previous_value: Some("Desk".into()),
            header_y_threshold: 100.0,
        };
        let err = filler
            .fill_field(
                &mut surface,
                &LogicalField::Price.spec(),
                &FieldValue::Text("120".into()),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::FieldNotFound(field) if field == "price"));
    }

    #[tokio::test]
    async fn dropdown_prefers_role_option_then_text_then_keys() {
        let filler = FormFiller::new(form_section());

        // role option available
        let mut surface = MockSurface::new();
        surface.respond("role:condition", 1);
        surface.respond("role-option:New", 1);
        let mut ctx = FillContext::default();
        filler
            .fill_field(
                &mut surface,
                &LogicalField::Condition.spec(),
                &FieldValue::OptionChoice("New".into()),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            surface.actions,
            vec!["click:role:condition#0", "click:role-option:New#0"]
        );

        // nothing matches inside the dropdown: fall through to keystrokes
        let mut surface = MockSurface::new();
        surface.respond("role:condition", 1);
        let mut ctx = FillContext::default();
        filler
            .fill_field(
                &mut surface,
                &LogicalField::Condition.spec(),
                &FieldValue::OptionChoice("New".into()),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            surface.actions,
            vec!["click:role:condition#0", "keys:Home+ArrowDown+Enter"]
        );
    }

    #[tokio::test]
    async fn keyboard_anchor_drives_dropdown_without_direct_control() {
        let filler = FormFiller::new(form_section());
        let mut surface = MockSurface::new();
        // role and text-anchor rungs find nothing unique, but the raw label
        // is visible on the page
        surface.respond("visible-text:Availability", 1);
        let mut ctx = FillContext::default();
        filler
            .fill_field(
                &mut surface,
                &LogicalField::Availability.spec(),
                &FieldValue::OptionChoice("In stock".into()),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            surface.actions,
            vec![
                "click:visible-text:Availability#0",
                "keys:Home+ArrowDown+Enter",
            ]
        );
    }

    #[tokio::test]
    async fn fill_form_walks_fields_in_fixed_order() {
        let filler = FormFiller::new(form_section());
        let mut surface = MockSurface::new();
        surface.respond("file-input", 1);
        for field in ["title", "price", "description", "category", "condition"] {
            surface.respond(&format!("role:{field}"), 1);
        }
        surface.respond("role:availability|list as in stock", 1);
        for option in ["Furniture", "New", "In stock"] {
            surface.respond(&format!("role-option:{option}"), 1);
        }

        filler
            .fill_form(&mut surface, &sample_form())
            .await
            .unwrap();

        let filled: Vec<&str> = surface
            .actions
            .iter()
            .filter(|action| !action.starts_with("click:role-option"))
            .map(|action| action.as_str())
            .collect();
        assert_eq!(
            filled,
            vec![
                "files:/tmp/chair.jpg",
                "fill:role:title#0=Mid-century armchair",
                "fill:role:price#0=120",
                "click:role:category#0",
                "click:role:condition#0",
                "fill:role:description#0=Solid teak, reupholstered.",
                "click:role:availability|list as in stock#0",
            ]
        );
    }

    #[tokio::test]
    async fn missing_confirm_button_is_a_publish_failure() {
        let filler = FormFiller::new(form_section());
        let mut surface = MockSurface::new();
        surface.respond("visible-text:Next", 1);
        let labels = vec!["Next".to_string(), "Publish".to_string()];
        let err = filler.confirm(&mut surface, &labels).await.unwrap_err();
        assert!(matches!(err, BrowserError::PublishConfirmation(message) if message.contains("Publish")));
        assert_eq!(surface.actions, vec!["click:visible-text:Next#0"]);
    }
}
