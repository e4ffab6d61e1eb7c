use std::sync::Arc;
use glam::Mat4;
use crate::renderer::camera::Camera;
use crate::renderer::graph::node::StateGroup;

/// Root of the scene traversed by a scene pass.
pub struct SceneRoot {
    pub transform: Mat4,
    children: Vec<StateGroup>,
}

impl SceneRoot {
    /// Empty scene, as used by the repro scenarios.
    pub fn new() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: StateGroup) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(&self) -> &[StateGroup] {
        &self.children
    }
}

impl Default for SceneRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera and scene pairing. Passes share a view through the `Arc`; the
/// allocation's identity, not its contents, selects the compiled per-view
/// state.
pub struct View {
    pub camera: Camera,
    pub scene: SceneRoot,
}

impl View {
    pub fn new(camera: Camera, scene: SceneRoot) -> Arc<Self> {
        Arc::new(Self { camera, scene })
    }

    pub fn is_same(a: &Arc<View>, b: &Arc<View>) -> bool {
        Arc::ptr_eq(a, b)
    }
}
