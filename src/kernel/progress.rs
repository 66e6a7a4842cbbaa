//! Reload progress reporting through message edits

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::application::format::progress_bar;
use crate::domain::traits::Bot;

/// Minimum gap between two intermediate edits
pub const EMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Message the progress is written into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTarget {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Step counter for one reload cycle.
///
/// The total is fixed up front; edits are throttled to one per
/// `EMIT_INTERVAL`, except the final step which is always written.
pub struct ReloadProgress {
    title: String,
    total: usize,
    step: usize,
    last_emit: Option<Instant>,
    sink: Option<(Arc<dyn Bot>, ProgressTarget)>,
}

impl ReloadProgress {
    /// Counter without a message to edit
    pub fn silent(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            total: 0,
            step: 0,
            last_emit: None,
            sink: None,
        }
    }

    pub fn new(title: impl Into<String>, bot: Arc<dyn Bot>, target: ProgressTarget) -> Self {
        Self {
            sink: Some((bot, target)),
            ..Self::silent(title)
        }
    }

    /// `unloaded + 3 × discovered`
    pub fn set_total(&mut self, unloaded: usize, discovered: usize) {
        self.total = unloaded + 3 * discovered;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.step.min(self.total) * 100) / self.total) as u8
    }

    pub fn is_final(&self) -> bool {
        self.step >= self.total
    }

    /// Throttle decision for an edit at `now`
    pub fn should_emit(&self, now: Instant, is_final: bool) -> bool {
        if is_final {
            return true;
        }
        match self.last_emit {
            Some(last) => now.duration_since(last) >= EMIT_INTERVAL,
            None => true,
        }
    }

    pub fn render(&self, label: &str) -> String {
        format!(
            "{}\n\n<code>{}</code> <b>{}%</b>\n<i>{}</i>",
            self.title,
            progress_bar(self.percent(), 10),
            self.percent(),
            label
        )
    }

    /// Count one step and maybe write it out. Delivery errors are dropped.
    pub async fn advance(&mut self, label: &str) {
        self.step += 1;
        let now = Instant::now();
        let is_final = self.is_final();
        if self.sink.is_none() || !self.should_emit(now, is_final) {
            return;
        }
        self.last_emit = Some(now);

        let text = self.render(label);
        if let Some((bot, target)) = &self.sink {
            if let Err(e) = bot.edit_message(target.chat_id, target.message_id, &text, None).await {
                tracing::debug!(step = self.step, "Progress edit failed: {}", e);
            }
        }
    }

    /// Mark an emit at `now` without sending anything
    #[cfg(test)]
    fn mark_emitted(&mut self, now: Instant) {
        self.last_emit = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_counts_three_steps_per_module() {
        let mut progress = ReloadProgress::silent("Reload");
        progress.set_total(2, 4);
        assert_eq!(progress.total(), 14);
    }

    #[test]
    fn throttles_intermediate_steps() {
        let mut progress = ReloadProgress::silent("Reload");
        let start = Instant::now();
        assert!(progress.should_emit(start, false));

        progress.mark_emitted(start);
        assert!(!progress.should_emit(start + Duration::from_millis(400), false));
        assert!(progress.should_emit(start + Duration::from_millis(400), true));
        assert!(progress.should_emit(start + Duration::from_millis(1000), false));
    }

    #[tokio::test]
    async fn counter_is_monotonic_and_reaches_total() {
        let mut progress = ReloadProgress::silent("Reload");
        progress.set_total(1, 1);
        let mut seen = Vec::new();
        for _ in 0..4 {
            progress.advance("step").await;
            seen.push(progress.percent());
        }
        assert_eq!(seen, vec![25, 50, 75, 100]);
        assert!(progress.is_final());
    }

    #[test]
    fn renders_bar() {
        let mut progress = ReloadProgress::silent("<b>Reload</b>");
        progress.set_total(0, 5);
        progress.step = 9;
        assert!(progress.render("Setting up").contains("<code>[██████░░░░]</code> <b>60%</b>"));
    }
}
