use std::time::Duration;

use chromiumoxide::element::Element;
use rand::Rng;
use tokio::time::sleep;

use crate::config::TypingSection;

use super::error::{BrowserError, BrowserResult};

/// Paces clicks and keystrokes so form input lands at a human cadence
/// instead of a single burst.
#[derive(Debug, Clone)]
pub struct InputPacer {
    config: TypingSection,
}

impl InputPacer {
    pub fn new(config: TypingSection) -> Self {
        Self { config }
    }

    pub async fn click_element(&self, element: &Element) -> BrowserResult<()> {
        let hesitation = random_duration(self.config.click_hesitation_ms);
        sleep(hesitation).await;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to click element: {err}")))?;
        Ok(())
    }

    pub async fn type_text(&self, element: &Element, text: &str) -> BrowserResult<()> {
        element.click().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to focus element before typing: {err}"))
        })?;
        for ch in text.chars() {
            element.type_str(ch.to_string()).await.map_err(|err| {
                BrowserError::Unexpected(format!("failed to type character: {err}"))
            })?;
            let delay = self.typing_delay();
            sleep(delay).await;
        }
        Ok(())
    }

    pub async fn settle(&self, base_ms: u64) -> BrowserResult<()> {
        let jitter = random_duration(self.config.jitter_ms);
        sleep(Duration::from_millis(base_ms) + jitter).await;
        Ok(())
    }

    fn typing_delay(&self) -> Duration {
        let [low, high] = self.config.cadence_cpm;
        let low = low.max(1);
        let high = high.max(low);
        let cpm = rand::thread_rng().gen_range(low..=high) as u64;
        let base_ms = 60_000 / cpm.max(1);
        Duration::from_millis(base_ms) + random_duration(self.config.jitter_ms)
    }
}

fn random_duration(range_ms: [u32; 2]) -> Duration {
    let low = range_ms[0].min(range_ms[1]) as u64;
    let high = range_ms[0].max(range_ms[1]) as u64;
    if high == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}
