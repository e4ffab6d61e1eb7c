//! Command Graph Integration Tests
//!
//! Tests for:
//! - Assembly: fixed pass order, empty masks
//! - Pass building: push-constant ranges, full-screen pipeline states, debug names
//! - Compilation: per-view pipeline variants, shared compiled views
//! - Recording: full-screen draws and push-constant uploads

use std::sync::Arc;
use ash::vk;
use ash::vk::Handle;
use glam::Vec4;
use pushconst_repro::renderer::config::RenderConfig;
use pushconst_repro::renderer::error::GraphError;
use pushconst_repro::renderer::graph::node::{Command, PassKind, PushConstants, StateGroup};
use pushconst_repro::renderer::graph::pass_builder::{PassBuilder, PUSH_CONSTANT_SIZE};
use pushconst_repro::renderer::graph::pipeline::PushConstantSpan;
use pushconst_repro::renderer::graph::view::{SceneRoot, View};
use pushconst_repro::renderer::graph::{assemble, compile, CompiledGraph, PassMask, Scenario, SceneViews, ViewIndex};
use pushconst_repro::renderer::camera::Camera;
use pushconst_repro::renderer::shaders::FragmentVariant;
use pushconst_repro::renderer::trace::{RecordedCommand, TraceDevice, TraceObject, TraceRecorder};

fn setup() -> (TraceDevice, RenderConfig, SceneViews) {
    let config = RenderConfig::default();
    let views = SceneViews::new(&config);
    (TraceDevice::new(0), config, views)
}

fn record(device: &TraceDevice, graph: &CompiledGraph) -> Vec<RecordedCommand> {
    let mut recorder = TraceRecorder::new(device);
    graph.record(&mut recorder).unwrap();
    recorder.into_commands()
}

fn fragment_push_constants() -> PushConstantSpan {
    PushConstantSpan {
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: 16,
    }
}

// ============================================================================
// Assembly
// ============================================================================

#[test]
fn assembly_follows_fixed_slot_order() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), false).unwrap();
    let graph = assemble(&device, 0, &scenario, &config).unwrap();

    let kinds = graph.children().iter().map(|pass| pass.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            PassKind::Scene,
            PassKind::SimpleFullscreen,
            PassKind::Scene,
            PassKind::PushConstFullscreen,
        ],
    );
}

#[test]
fn assembly_includes_only_selected_slots() {
    let (device, config, views) = setup();
    let scenario = views
        .scenario(PassMask::SECOND_SCENE | PassMask::SIMPLE_FULLSCREEN, true)
        .unwrap();
    let graph = assemble(&device, 3, &scenario, &config).unwrap();

    assert_eq!(graph.queue_family(), 3);
    assert_eq!(graph.children().len(), 2);
    assert_eq!(graph.children()[0].kind, PassKind::SimpleFullscreen);
    assert!(View::is_same(
        graph.children()[1].view().unwrap(),
        &views.secondary,
    ));
}

#[test]
fn empty_mask_fails_before_any_resource_exists() {
    let (device, _config, views) = setup();
    let err = views.scenario(PassMask::empty(), false).unwrap_err();

    assert_eq!(err.downcast_ref::<GraphError>(), Some(&GraphError::EmptyPassMask));
    assert!(device.events().is_empty());
}

#[test]
fn every_pass_owns_its_target_and_framebuffer() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), false).unwrap();
    let graph = assemble(&device, 0, &scenario, &config).unwrap();

    assert_eq!(device.created_count(TraceObject::Image), 4);
    assert_eq!(device.created_count(TraceObject::Framebuffer), 4);
    assert_eq!(device.created_count(TraceObject::RenderPass), 4);

    for pass in graph.children() {
        assert_eq!(pass.target.extent, RenderConfig::DEFAULT_EXTENT);
        assert_eq!(pass.target.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(pass.render_area.extent, RenderConfig::DEFAULT_EXTENT);
        assert_eq!(pass.clear_color, [1.0, 1.0, 0.0, 0.0]);
    }
}

// ============================================================================
// Pass Building
// ============================================================================

#[test]
fn push_constant_layout_matches_recorded_upload() {
    let (device, config, _views) = setup();
    let pass = PassBuilder::new(&device, &config)
        .fullscreen_pass(FragmentVariant::PushConstants)
        .unwrap();
    let group = pass.state_group().unwrap();

    assert_eq!(PUSH_CONSTANT_SIZE, 16);
    assert_eq!(group.pipeline.layout.push_constant_ranges(), &[fragment_push_constants()]);

    let scenario = Scenario::new(
        PassMask::PUSH_CONST_FULLSCREEN,
        View::new(Camera::new(config.extent), SceneRoot::new()),
        View::new(Camera::new(config.extent), SceneRoot::new()),
    )
    .unwrap();
    let graph = assemble(&device, 0, &scenario, &config).unwrap();
    let compiled = compile(graph, &device).unwrap();
    let commands = record(&device, &compiled);

    let (layout, stage_flags, offset, data) = commands
        .iter()
        .find_map(|command| match command {
            RecordedCommand::PushConstants { layout, stage_flags, offset, data } => {
                Some((*layout, *stage_flags, *offset, data.clone()))
            }
            _ => None,
        })
        .unwrap();

    assert_eq!(stage_flags, vk::ShaderStageFlags::FRAGMENT);
    assert_eq!(offset, 0);
    assert_eq!(data.len(), 16);
    assert_eq!(data, bytemuck::bytes_of(&Vec4::new(0.0, 1.0, 0.0, 1.0)));
    assert_eq!(device.layout_ranges(layout), Some(vec![fragment_push_constants()]));
}

#[test]
fn simple_variant_declares_no_push_constants() {
    let (device, config, _views) = setup();
    let group = PassBuilder::new(&device, &config)
        .fullscreen_state_group(FragmentVariant::Simple)
        .unwrap();

    assert!(group.pipeline.layout.push_constant_ranges().is_empty());
    assert!(group
        .children()
        .iter()
        .all(|command| !matches!(command, Command::PushConstants(_))));
}

#[test]
fn fullscreen_pipelines_disable_cull_blend_and_depth() {
    let (device, config, views) = setup();
    let scenario = views
        .scenario(PassMask::SIMPLE_FULLSCREEN | PassMask::PUSH_CONST_FULLSCREEN, false)
        .unwrap();
    compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    let pipelines = device.pipelines();
    assert_eq!(pipelines.len(), 2);
    for pipeline in pipelines {
        let raster = pipeline.states.rasterization().unwrap();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::NONE);
        assert!(!pipeline.states.depth_stencil().unwrap().depth_test_enable);
        assert!(!pipeline.states.color_blend().unwrap().attachments[0].blend_enable);
        assert_eq!(
            pipeline.stages,
            vec![vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT],
        );
    }
}

#[test]
fn layouts_and_pipelines_carry_debug_names() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::PUSH_CONST_FULLSCREEN, false).unwrap();
    compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    let pipeline = device.pipelines().pop().unwrap();
    assert_eq!(
        device.debug_name(pipeline.layout.as_raw()).as_deref(),
        Some("fullscreen_PushConstants"),
    );
    assert_eq!(
        device.debug_name(pipeline.handle.as_raw()).as_deref(),
        Some("fullscreen_PushConstants"),
    );
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn shared_view_compiles_to_one_view_state() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), false).unwrap();
    let compiled = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    let first = compiled.pass_view(0).unwrap();
    let second = compiled.pass_view(2).unwrap();

    assert!(Arc::ptr_eq(first, second));
    assert_eq!(compiled.views().len(), 1);
    assert_eq!(first.index, ViewIndex(0));
    assert!(compiled.pass_view(1).is_none());
    assert!(compiled.pass_view(3).is_none());
}

#[test]
fn distinct_views_compile_independently() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), true).unwrap();
    let compiled = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    let first = compiled.pass_view(0).unwrap();
    let second = compiled.pass_view(2).unwrap();

    assert!(!Arc::ptr_eq(first, second));
    assert_eq!(first.index, ViewIndex(0));
    assert_eq!(second.index, ViewIndex(1));
    assert!(View::is_same(&second.view, &views.secondary));
}

/// Scenes that draw something, sharing one pipeline configuration.
fn scene_views(config: &RenderConfig, device: &TraceDevice) -> (Arc<View>, Arc<View>, StateGroup) {
    let builder = PassBuilder::new(device, config);
    let template = builder.fullscreen_state_group(FragmentVariant::PushConstants).unwrap();

    let group = |name: &str| {
        let mut group = StateGroup::new(name, template.pipeline.clone());
        for command in template.children() {
            group.add_child(*command);
        }
        group
    };

    let first = View::new(Camera::new(config.extent), SceneRoot::new().with_child(group("first")));
    let second = View::new(Camera::new(config.extent), SceneRoot::new().with_child(group("second")));
    (first, second, template)
}

#[test]
fn scene_pipelines_get_one_variant_per_view() {
    let device = TraceDevice::new(0);
    let config = RenderConfig::default();
    let (first, second, template) = scene_views(&config, &device);
    let pipeline_id = template.pipeline.id();

    let scenario = Scenario::new(PassMask::FIRST_SCENE | PassMask::SECOND_SCENE, first, second).unwrap();
    let compiled = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    let variant0 = compiled.pipeline_variant(pipeline_id, ViewIndex(0)).unwrap();
    let variant1 = compiled.pipeline_variant(pipeline_id, ViewIndex(1)).unwrap();
    assert_ne!(variant0.pipeline, variant1.pipeline);
    assert_eq!(variant0.layout, variant1.layout);
    assert_eq!(device.created_count(TraceObject::PipelineLayout), 1);
    assert_eq!(device.created_count(TraceObject::ShaderModule), 2);

    let bound = record(&device, &compiled)
        .into_iter()
        .filter_map(|command| match command {
            RecordedCommand::BindGraphicsPipeline { pipeline } => Some(pipeline),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(bound, vec![variant0.pipeline, variant1.pipeline]);
}

#[test]
fn shared_scene_view_reuses_its_variant() {
    let device = TraceDevice::new(0);
    let config = RenderConfig::default();
    let (first, _second, template) = scene_views(&config, &device);

    let scenario = Scenario::new(PassMask::all(), first.clone(), first).unwrap();
    let compiled = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    assert!(compiled.pipeline_variant(template.pipeline.id(), ViewIndex(0)).is_some());
    assert!(compiled.pipeline_variant(template.pipeline.id(), ViewIndex(1)).is_none());
    // Scene variant plus one pipeline per full-screen pass
    assert_eq!(compiled.pipeline_variant_count(), 3);
}

#[test]
fn uncovered_push_constants_are_rejected_at_compile() {
    let (device, config, _views) = setup();
    let mut group = PassBuilder::new(&device, &config)
        .fullscreen_state_group(FragmentVariant::Simple)
        .unwrap();
    group.add_child(Command::PushConstants(PushConstants::new(
        vk::ShaderStageFlags::FRAGMENT,
        0,
        Vec4::ONE,
    )));

    let view = View::new(Camera::new(config.extent), SceneRoot::new().with_child(group));
    let scenario = Scenario::new(PassMask::FIRST_SCENE, view.clone(), view).unwrap();
    let err = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap_err();

    assert_eq!(
        err.downcast_ref::<GraphError>(),
        Some(&GraphError::PushConstantRangeMismatch {
            pass: "fullscreen_Simple".to_owned(),
            stages: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: 16,
        }),
    );
}

#[test]
fn push_constants_past_u32_range_are_rejected() {
    let (device, config, _views) = setup();
    let mut group = PassBuilder::new(&device, &config)
        .fullscreen_state_group(FragmentVariant::PushConstants)
        .unwrap();
    group.add_child(Command::PushConstants(PushConstants::new(
        vk::ShaderStageFlags::FRAGMENT,
        u32::MAX - 4,
        Vec4::ONE,
    )));

    let view = View::new(Camera::new(config.extent), SceneRoot::new().with_child(group));
    let scenario = Scenario::new(PassMask::FIRST_SCENE, view.clone(), view).unwrap();
    let err = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::PushConstantRangeMismatch { offset, .. }) if *offset == u32::MAX - 4
    ));
}

#[test]
fn compiled_graph_debug_summarizes_contents() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), true).unwrap();
    let compiled = compile(assemble(&device, 2, &scenario, &config).unwrap(), &device).unwrap();

    assert_eq!(
        format!("{:?}", compiled),
        "CompiledGraph { queue_family: 2, passes: 4, views: 2, pipeline_variants: 2 }",
    );
}

// ============================================================================
// Recording
// ============================================================================

#[test]
fn fullscreen_passes_draw_one_vertexless_triangle() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), false).unwrap();
    let compiled = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();

    let draws = record(&device, &compiled)
        .into_iter()
        .filter(|command| matches!(command, RecordedCommand::Draw { .. }))
        .collect::<Vec<_>>();

    assert_eq!(draws.len(), 2);
    for draw in draws {
        assert_eq!(
            draw,
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
        );
    }
}

#[test]
fn every_render_pass_is_closed() {
    let (device, config, views) = setup();
    let scenario = views.scenario(PassMask::all(), true).unwrap();
    let compiled = compile(assemble(&device, 0, &scenario, &config).unwrap(), &device).unwrap();
    let commands = record(&device, &compiled);

    let begins = commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::BeginRenderPass { .. }))
        .count();
    let ends = commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::EndRenderPass))
        .count();

    assert_eq!(begins, 4);
    assert_eq!(ends, 4);
    assert_eq!(commands.last(), Some(&RecordedCommand::EndRenderPass));
}
