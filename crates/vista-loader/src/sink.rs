use std::sync::Arc;

use vista_assets::SceneDocument;

/// Consumer of successfully loaded scenes.
///
/// Called at most once per load, and never for a load that has been
/// superseded by a newer one.
pub trait SceneSink: Send + Sync + 'static {
    fn set_content(&self, scene: Arc<SceneDocument>);
}
