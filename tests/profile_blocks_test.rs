//! Profile block aggregation tests
//! Run with: cargo test --test profile_blocks_test

use std::sync::{Arc, Once};

use wiralis_bot::application::errors::BotError;
use wiralis_bot::domain::traits::{KeyboardButton, Store};
use wiralis_bot::infrastructure::database::Database;
use wiralis_bot::modules::profile::{BlockContent, ProfileBlockManager, RenderResult};

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

const SUBJECT: i64 = 100;

async fn store() -> Arc<Database> {
    ensure_init();
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.upsert_user(SUBJECT, "Neo", Some("neo")).await.unwrap();
    db
}

fn text_block(blocks: &ProfileBlockManager, id: &'static str, priority: i32) {
    blocks.register_block(id, id.to_uppercase(), priority, move |_subject| async move {
        Ok(Some(BlockContent::text(format!("{} body", id))))
    });
}

async fn failing_block(_subject: i64) -> RenderResult {
    Err(BotError::Internal("boom".to_string()))
}

async fn panicking_block(_subject: i64) -> RenderResult {
    panic!("render exploded")
}

#[tokio::test]
async fn blocks_render_by_priority_then_registration() {
    let db = store().await;
    let blocks = ProfileBlockManager::new();
    text_block(&blocks, "a", 90);
    text_block(&blocks, "b", 70);
    text_block(&blocks, "c", 80);
    text_block(&blocks, "d", 80);

    let profile = blocks.aggregate(&*db, SUBJECT, false).await;
    assert_eq!(profile.block_ids(), vec!["a", "c", "d", "b"]);
    assert_eq!(profile.fragments()[0], "<b>A</b>\na body");
}

#[tokio::test]
async fn re_registering_replaces_in_place() {
    let db = store().await;
    let blocks = ProfileBlockManager::new();
    text_block(&blocks, "first", 50);
    text_block(&blocks, "second", 50);
    blocks.register_block("first", "First v2", 50, |_| async {
        Ok(Some(BlockContent::text("new body")))
    });

    assert_eq!(blocks.len(), 2);
    let profile = blocks.aggregate(&*db, SUBJECT, false).await;
    assert_eq!(profile.block_ids(), vec!["first", "second"]);
    assert_eq!(profile.blocks[0].title, "First v2");
    assert_eq!(profile.blocks[0].content, "new body");
}

#[tokio::test]
async fn restricted_view_honours_visibility_and_drops_buttons() {
    let db = store().await;
    let blocks = ProfileBlockManager::new();
    blocks.register_block("public", "Public", 50, |subject| async move {
        Ok(Some(
            BlockContent::text("hello").with_buttons(vec![vec![KeyboardButton::callback("Edit", format!("edit_{}", subject))]]),
        ))
    });
    text_block(&blocks, "hidden", 40);
    text_block(&blocks, "settings_profile_block", 10);
    db.set_block_visibility(SUBJECT, "hidden", false).await.unwrap();
    db.set_block_visibility(SUBJECT, "settings_profile_block", true).await.unwrap();

    let own = blocks.aggregate(&*db, SUBJECT, false).await;
    assert_eq!(own.block_ids(), vec!["public", "hidden", "settings_profile_block"]);
    assert_eq!(own.buttons.len(), 1);
    assert_eq!(own.buttons[0][0].callback_data.as_deref(), Some("edit_100"));

    // the settings block stays private whatever its stored visibility
    let visitor = blocks.aggregate(&*db, SUBJECT, true).await;
    assert_eq!(visitor.block_ids(), vec!["public"]);
    assert!(visitor.buttons.is_empty());
}

#[tokio::test]
async fn broken_blocks_are_skipped() {
    let db = store().await;
    let blocks = ProfileBlockManager::new();
    text_block(&blocks, "before", 30);
    blocks.register_block("failing", "Failing", 20, failing_block);
    blocks.register_block("panicking", "Panicking", 15, panicking_block);
    blocks.register_block("empty", "Empty", 12, |_| async { Ok(None) });
    text_block(&blocks, "after", 10);

    let profile = blocks.aggregate(&*db, SUBJECT, false).await;
    assert!(profile.configured);
    assert_eq!(profile.block_ids(), vec!["before", "after"]);
}

#[tokio::test]
async fn empty_registry_reports_not_configured() {
    let db = store().await;
    let blocks = ProfileBlockManager::new();

    let profile = blocks.aggregate(&*db, SUBJECT, false).await;
    assert!(!profile.configured);
    assert_eq!(profile.to_html(), "Profile is not configured.");

    text_block(&blocks, "only", 1);
    assert!(blocks.unregister_block("only"));
    assert!(!blocks.unregister_block("only"));
    assert!(blocks.is_empty());
    assert!(!blocks.aggregate(&*db, SUBJECT, false).await.configured);
}

#[tokio::test]
async fn blocks_listing_follows_render_order() {
    let blocks = ProfileBlockManager::new();
    text_block(&blocks, "low", 1);
    text_block(&blocks, "high", 99);

    let ids: Vec<_> = blocks.blocks().into_iter().map(|b| (b.id, b.priority)).collect();
    assert_eq!(ids, vec![("high".to_string(), 99), ("low".to_string(), 1)]);
    assert_eq!(blocks.clear(), 2);
}
