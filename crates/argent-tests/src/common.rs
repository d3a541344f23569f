//! Shared fixtures.

use std::sync::Arc;

use argent_core::{image_flags, ImageId, ImageInfo};
use argent_db::Database;
use argent_develop::{Develop, DevelopConfig, Env, SyntheticRaw};
use argent_modules::ModuleRegistry;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
        .try_init();
}

/// An environment over an in-memory store with one small test image.
pub fn env_with_image(width: u32, height: u32) -> Arc<Env> {
    env_with_registry(width, height, ModuleRegistry::with_builtins())
}

pub fn env_with_registry(width: u32, height: u32, registry: ModuleRegistry) -> Arc<Env> {
    init_tracing();
    let db = Database::open_in_memory().unwrap();
    let mut image = ImageInfo::test_image(1);
    image.width = width;
    image.height = height;
    db.upsert_image(&image).unwrap();
    let source = Arc::new(SyntheticRaw);
    Env::new(
        db,
        registry,
        source.clone(),
        source,
        DevelopConfig {
            autosave_enabled: false,
            wait_hash_timeout_ms: 150,
            wait_hash_poll_ms: 5,
            ..Default::default()
        },
    )
}

/// Mark the image as already preset-initialised so scenarios start from
/// an empty history.
pub fn skip_presets(env: &Env) {
    let mut image = env.db.load_image(ImageId(1)).unwrap();
    image.set_flag(image_flags::AUTO_PRESETS_APPLIED);
    env.db.update_image_flags(image.id, image.flags).unwrap();
}

pub fn load(env: &Arc<Env>) -> Arc<Develop> {
    Develop::load_image(env.clone(), ImageId(1), None).unwrap()
}
