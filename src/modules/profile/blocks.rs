//! Profile block registry - features publish renderable fragments of the
//! profile page without knowing about each other.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::application::errors::BotError;
use crate::domain::traits::{Keyboard, Store};

/// Blocks never shown to anyone but the profile owner
pub const ALWAYS_EXCLUDED: [&str; 2] = ["registration_profile_info", "settings_profile_block"];

/// What a render callback produces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockContent {
    pub content: String,
    /// Only shown in the owner's own view
    pub buttons: Option<Keyboard>,
}

impl BlockContent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            buttons: None,
        }
    }

    pub fn with_buttons(mut self, buttons: Keyboard) -> Self {
        self.buttons = Some(buttons);
        self
    }
}

pub type RenderResult = Result<Option<BlockContent>, BotError>;

/// Async render callback: subject telegram id -> optional content
pub type RenderFn = Arc<dyn Fn(i64) -> BoxFuture<'static, RenderResult> + Send + Sync>;

#[derive(Clone)]
struct BlockEntry {
    id: String,
    title: String,
    priority: i32,
    render: RenderFn,
}

/// Registered block without its callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: String,
    pub title: String,
    pub priority: i32,
}

/// One block that rendered successfully
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBlock {
    pub id: String,
    pub title: String,
    pub content: String,
}

impl RenderedBlock {
    pub fn fragment(&self) -> String {
        format!("<b>{}</b>\n{}", self.title, self.content)
    }
}

/// Output of one aggregation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedProfile {
    /// False when no block was registered at all
    pub configured: bool,
    pub blocks: Vec<RenderedBlock>,
    pub buttons: Keyboard,
}

impl AggregatedProfile {
    pub fn fragments(&self) -> Vec<String> {
        self.blocks.iter().map(RenderedBlock::fragment).collect()
    }

    pub fn block_ids(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.id.as_str()).collect()
    }

    pub fn to_html(&self) -> String {
        if !self.configured {
            return "Profile is not configured.".to_string();
        }
        self.fragments().join("\n\n")
    }
}

/// Block id -> render callback, title and priority.
///
/// Registering an existing id replaces it in place: the newest callback,
/// title and priority win, the registration position used for equal
/// priorities stays that of the first registration.
#[derive(Default)]
pub struct ProfileBlockManager {
    entries: Mutex<Vec<BlockEntry>>,
}

impl ProfileBlockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<BlockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_block<F, Fut>(&self, id: impl Into<String>, title: impl Into<String>, priority: i32, render: F)
    where
        F: Fn(i64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RenderResult> + Send + 'static,
    {
        let entry = BlockEntry {
            id: id.into(),
            title: title.into(),
            priority,
            render: Arc::new(move |subject| render(subject).boxed()),
        };

        let mut entries = self.entries();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => {
                debug!(block = %entry.id, "Replacing profile block");
                *existing = entry;
            }
            None => {
                info!(block = %entry.id, priority, "Profile block registered");
                entries.push(entry);
            }
        }
    }

    /// Remove a block, false if it was not registered
    pub fn unregister_block(&self, id: &str) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            info!(block = id, "Profile block removed");
        }
        removed
    }

    /// Drop every block, returns how many there were
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().iter().any(|e| e.id == id)
    }

    pub fn compact(&self) {
        self.entries().shrink_to_fit();
    }

    /// Entries in render order: priority descending, then registration order
    fn ordered(&self) -> Vec<BlockEntry> {
        let mut snapshot = self.entries().clone();
        snapshot.sort_by(|a, b| b.priority.cmp(&a.priority));
        snapshot
    }

    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.ordered()
            .into_iter()
            .map(|e| BlockInfo {
                id: e.id,
                title: e.title,
                priority: e.priority,
            })
            .collect()
    }

    /// Render every block for `subject_id`.
    ///
    /// A restricted view (someone else's profile) skips the always-excluded
    /// blocks and every block the subject hid, and carries no buttons.
    /// A failing or panicking block is logged and left out.
    pub async fn aggregate(&self, store: &dyn Store, subject_id: i64, restricted: bool) -> AggregatedProfile {
        let entries = self.ordered();
        if entries.is_empty() {
            return AggregatedProfile::default();
        }

        let visibility = if restricted {
            match store.profile_visibility(subject_id).await {
                Ok(map) => map,
                Err(e) => {
                    warn!(subject_id, "Visibility lookup failed, showing defaults: {}", e);
                    Default::default()
                }
            }
        } else {
            Default::default()
        };

        let mut profile = AggregatedProfile {
            configured: true,
            ..Default::default()
        };

        for entry in entries {
            if restricted {
                if ALWAYS_EXCLUDED.contains(&entry.id.as_str()) {
                    continue;
                }
                if !visibility.get(&entry.id).copied().unwrap_or(true) {
                    continue;
                }
            }

            let render = entry.render.clone();
            let outcome = AssertUnwindSafe(async move { render(subject_id).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(Some(block))) => {
                    if !restricted {
                        if let Some(buttons) = block.buttons {
                            profile.buttons.extend(buttons);
                        }
                    }
                    profile.blocks.push(RenderedBlock {
                        id: entry.id,
                        title: entry.title,
                        content: block.content,
                    });
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => error!(block = %entry.id, subject_id, "Profile block failed: {}", e),
                Err(_) => error!(block = %entry.id, subject_id, "Profile block panicked"),
            }
        }

        profile
    }
}
