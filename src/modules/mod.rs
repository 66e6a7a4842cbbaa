//! Built-in feature modules

pub mod badges;
pub mod profile;
pub mod settings;
pub mod themes;

use std::sync::Arc;

use crate::domain::traits::Store;
use crate::kernel::{Module, ModuleCatalog};

/// Every feature compiled into the binary, in discovery order
pub fn builtin_catalog(store: Arc<dyn Store>) -> ModuleCatalog {
    let (badge_store, profile_store, settings_store) = (store.clone(), store.clone(), store.clone());
    let theme_store = store;

    ModuleCatalog::new()
        .with("badges", "src/modules/badges.rs", move || {
            Ok(Arc::new(badges::BadgesModule::new(badge_store.clone())) as Arc<dyn Module>)
        })
        .with("profile", "src/modules/profile/mod.rs", move || {
            Ok(Arc::new(profile::ProfileModule::new(profile_store.clone())) as Arc<dyn Module>)
        })
        .with("settings", "src/modules/settings.rs", move || {
            Ok(Arc::new(settings::SettingsModule::new(settings_store.clone())) as Arc<dyn Module>)
        })
        .with("themes", "src/modules/themes.rs", move || {
            Ok(Arc::new(themes::ThemesModule::new(theme_store.clone())) as Arc<dyn Module>)
        })
}
