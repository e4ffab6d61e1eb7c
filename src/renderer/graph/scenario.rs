use std::sync::Arc;
use bitflags::bitflags;
use clap::ValueEnum;
use color_eyre::Result;
use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::error::GraphError;
use crate::renderer::graph::view::{SceneRoot, View};

bitflags! {
    /// Pass slots drawn by a scenario.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PassMask: u8 {
        const FIRST_SCENE = 1 << 0;
        const SIMPLE_FULLSCREEN = 1 << 1;
        const SECOND_SCENE = 1 << 2;
        const PUSH_CONST_FULLSCREEN = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassSlot {
    FirstScene,
    SimpleFullscreen,
    SecondScene,
    PushConstFullscreen,
}

impl PassSlot {
    /// Order in which slots are appended to the command graph.
    pub const ORDER: [PassSlot; 4] = [
        PassSlot::FirstScene,
        PassSlot::SimpleFullscreen,
        PassSlot::SecondScene,
        PassSlot::PushConstFullscreen,
    ];

    pub fn mask(self) -> PassMask {
        match self {
            PassSlot::FirstScene => PassMask::FIRST_SCENE,
            PassSlot::SimpleFullscreen => PassMask::SIMPLE_FULLSCREEN,
            PassSlot::SecondScene => PassMask::SECOND_SCENE,
            PassSlot::PushConstFullscreen => PassMask::PUSH_CONST_FULLSCREEN,
        }
    }
}

/// Which passes are drawn and which views back the two scene slots.
#[derive(Clone)]
pub struct Scenario {
    passes: PassMask,
    first_scene_view: Arc<View>,
    second_scene_view: Arc<View>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("passes", &self.passes)
            .field("shares_scene_view", &self.shares_scene_view())
            .finish()
    }
}

impl Scenario {
    pub fn new(
        passes: PassMask,
        first_scene_view: Arc<View>,
        second_scene_view: Arc<View>,
    ) -> Result<Self> {
        if passes.is_empty() {
            return Err(GraphError::EmptyPassMask.into());
        }

        Ok(Self {
            passes,
            first_scene_view,
            second_scene_view,
        })
    }

    pub fn passes(&self) -> PassMask {
        self.passes
    }

    /// Active slots in graph order.
    pub fn slots(&self) -> impl Iterator<Item = PassSlot> + '_ {
        PassSlot::ORDER
            .into_iter()
            .filter(|slot| self.passes.contains(slot.mask()))
    }

    pub fn first_scene_view(&self) -> &Arc<View> {
        &self.first_scene_view
    }

    pub fn second_scene_view(&self) -> &Arc<View> {
        &self.second_scene_view
    }

    pub fn shares_scene_view(&self) -> bool {
        View::is_same(&self.first_scene_view, &self.second_scene_view)
    }
}

/// The two candidate views the scene slots can use. Both scenes are empty.
pub struct SceneViews {
    pub primary: Arc<View>,
    pub secondary: Arc<View>,
}

impl SceneViews {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            primary: View::new(Camera::new(config.extent), SceneRoot::new()),
            secondary: View::new(Camera::new(config.extent), SceneRoot::new()),
        }
    }

    pub fn scenario(&self, passes: PassMask, distinct_views: bool) -> Result<Scenario> {
        let second = if distinct_views {
            self.secondary.clone()
        } else {
            self.primary.clone()
        };
        Scenario::new(passes, self.primary.clone(), second)
    }
}

/// Known reproductions of the defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ScenarioPreset {
    /// Push-constant full-screen pass only. Validation error once, no crash.
    PushConstOnly,
    /// All four passes, one view for both scenes. Validation error, then a
    /// crash inside the layer's `vkCmdBeginRenderPass` hook.
    AllSharedView,
    /// First scene and the push-constant pass. Validation error, then a crash
    /// inside the layer's `vkCmdCopyBuffer` hook.
    SceneAndPushConst,
    /// All four passes with distinct views. The second view's pipeline
    /// variant is the one that goes missing.
    AllDistinctViews,
}

impl ScenarioPreset {
    pub fn passes(self) -> PassMask {
        match self {
            ScenarioPreset::PushConstOnly => PassMask::PUSH_CONST_FULLSCREEN,
            ScenarioPreset::AllSharedView | ScenarioPreset::AllDistinctViews => PassMask::all(),
            ScenarioPreset::SceneAndPushConst => {
                PassMask::FIRST_SCENE | PassMask::PUSH_CONST_FULLSCREEN
            }
        }
    }

    pub fn uses_distinct_views(self) -> bool {
        matches!(self, ScenarioPreset::AllDistinctViews)
    }

    pub fn build(self, views: &SceneViews) -> Result<Scenario> {
        views.scenario(self.passes(), self.uses_distinct_views())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mask_is_a_configuration_error() {
        let views = SceneViews::new(&RenderConfig::default());
        let err = views.scenario(PassMask::empty(), false).unwrap_err();

        assert_eq!(err.downcast_ref::<GraphError>(), Some(&GraphError::EmptyPassMask));
    }

    #[test]
    fn slots_follow_declared_order() {
        let views = SceneViews::new(&RenderConfig::default());
        let scenario = views
            .scenario(PassMask::PUSH_CONST_FULLSCREEN | PassMask::FIRST_SCENE, false)
            .unwrap();

        assert_eq!(
            scenario.slots().collect::<Vec<_>>(),
            vec![PassSlot::FirstScene, PassSlot::PushConstFullscreen],
        );
    }

    #[test]
    fn every_mask_yields_its_bits_in_order() {
        let views = SceneViews::new(&RenderConfig::default());
        for bits in 1..=PassMask::all().bits() {
            let mask = PassMask::from_bits_truncate(bits);
            let scenario = views.scenario(mask, false).unwrap();
            let slots = scenario.slots().collect::<Vec<_>>();

            let expected = PassSlot::ORDER
                .into_iter()
                .filter(|slot| mask.contains(slot.mask()))
                .collect::<Vec<_>>();
            assert_eq!(slots, expected);
            assert_eq!(slots.len(), mask.bits().count_ones() as usize);
        }
    }

    #[test]
    fn presets_select_view_sharing() {
        let views = SceneViews::new(&RenderConfig::default());

        assert!(ScenarioPreset::AllSharedView.build(&views).unwrap().shares_scene_view());
        assert!(!ScenarioPreset::AllDistinctViews.build(&views).unwrap().shares_scene_view());
        assert_eq!(
            ScenarioPreset::PushConstOnly.build(&views).unwrap().passes(),
            PassMask::PUSH_CONST_FULLSCREEN,
        );
    }
}
