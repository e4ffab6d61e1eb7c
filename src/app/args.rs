use clap::Parser;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::graph::{PassMask, Scenario, ScenarioPreset, SceneViews};

/// Frames rendered by `--headless` runs without `--max-frames`.
pub const DEFAULT_HEADLESS_FRAMES: u64 = 1000;

/// Frames rendered by `--dry-run` runs without `--max-frames`.
pub const DEFAULT_DRY_RUN_FRAMES: u64 = 1;

#[derive(Parser, Debug, Clone)]
#[command(name = "pushconst-repro")]
#[command(about = "Multi-pass harness for the push-constant / shared-view validation defect", long_about = None)]
pub struct Args {
    /// Pass selection and view sharing to reproduce
    #[arg(long, value_enum, default_value_t = ScenarioPreset::PushConstOnly)]
    pub scenario: ScenarioPreset,

    /// Raw pass bitmask overriding --scenario (1 = first scene, 2 = simple
    /// full-screen, 4 = second scene, 8 = push-constant full-screen)
    #[arg(long, value_parser = parse_pass_mask)]
    pub passes: Option<PassMask>,

    /// Back the second scene slot with its own view (with --passes)
    #[arg(long, requires = "passes")]
    pub distinct_views: bool,

    /// Stop after this many frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Render without a window or swapchain
    #[arg(long)]
    pub headless: bool,

    /// Drive everything on the tracing backend and log each recorded command
    #[arg(long)]
    pub dry_run: bool,

    /// Do not request the validation layer
    #[arg(long)]
    pub no_validation: bool,

    /// Present with FIFO
    #[arg(long)]
    pub vsync: bool,
}

impl Args {
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            vsync: self.vsync,
            validation: !self.no_validation,
            ..RenderConfig::default()
        }
    }

    pub fn scenario(&self, views: &SceneViews) -> Result<Scenario> {
        match self.passes {
            Some(passes) => views.scenario(passes, self.distinct_views),
            None => self.scenario.build(views),
        }
    }

    /// Frame limit for the current mode, `None` runs until the window closes.
    pub fn frame_limit(&self) -> Option<u64> {
        if self.dry_run {
            Some(self.max_frames.unwrap_or(DEFAULT_DRY_RUN_FRAMES))
        } else if self.headless {
            Some(self.max_frames.unwrap_or(DEFAULT_HEADLESS_FRAMES))
        } else {
            self.max_frames
        }
    }
}

/// Accepts decimal, `0x` hex or `0b` binary.
fn parse_pass_mask(value: &str) -> Result<PassMask, String> {
    let bits = if let Some(binary) = value.strip_prefix("0b") {
        u8::from_str_radix(binary, 2)
    } else if let Some(hex) = value.strip_prefix("0x") {
        u8::from_str_radix(hex, 16)
    } else {
        value.parse::<u8>()
    }
    .map_err(|e| format!("invalid pass mask '{}': {}", value, e))?;

    PassMask::from_bits(bits).ok_or_else(|| {
        format!(
            "pass mask {:#06b} sets bits outside {:#06b}",
            bits,
            PassMask::all().bits(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("pushconst-repro").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_to_push_constant_only() {
        let args = parse(&[]).unwrap();

        assert_eq!(args.scenario, ScenarioPreset::PushConstOnly);
        assert_eq!(args.passes, None);
        assert_eq!(args.frame_limit(), None);
        assert!(args.render_config().validation);
    }

    #[test]
    fn pass_masks_accept_several_radixes() {
        assert_eq!(parse_pass_mask("9"), Ok(PassMask::FIRST_SCENE | PassMask::PUSH_CONST_FULLSCREEN));
        assert_eq!(parse_pass_mask("0xf"), Ok(PassMask::all()));
        assert_eq!(parse_pass_mask("0b0100"), Ok(PassMask::SECOND_SCENE));
        assert_eq!(parse_pass_mask("0"), Ok(PassMask::empty()));
        assert!(parse_pass_mask("16").is_err());
        assert!(parse_pass_mask("scene").is_err());
    }

    #[test]
    fn raw_mask_overrides_preset() {
        let args = parse(&["--scenario", "all-shared-view", "--passes", "5", "--distinct-views"]).unwrap();
        let scenario = args.scenario(&SceneViews::new(&args.render_config())).unwrap();

        assert_eq!(scenario.passes(), PassMask::FIRST_SCENE | PassMask::SECOND_SCENE);
        assert!(!scenario.shares_scene_view());
    }

    #[test]
    fn distinct_views_needs_a_mask() {
        assert!(parse(&["--distinct-views"]).is_err());
    }

    #[test]
    fn headless_has_a_default_frame_limit() {
        assert_eq!(parse(&["--headless"]).unwrap().frame_limit(), Some(DEFAULT_HEADLESS_FRAMES));
        assert_eq!(parse(&["--headless", "--max-frames", "3"]).unwrap().frame_limit(), Some(3));
        assert_eq!(parse(&["--dry-run"]).unwrap().frame_limit(), Some(DEFAULT_DRY_RUN_FRAMES));
    }
}
