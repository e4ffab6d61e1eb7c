use std::io::Cursor;
use std::sync::Arc;
use color_eyre::Result;

const FULLSCREEN_VERT: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/fullscreen.vert.spv"));
const FULLSCREEN_SIMPLE_FRAG: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/fullscreen_simple.frag.spv"));
const FULLSCREEN_PUSH_CONSTANTS_FRAG: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/fullscreen_push_constants.frag.spv"));

/// Fragment program drawn by a full-screen pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentVariant {
    /// Constant opaque red.
    Simple,
    /// Color read from a 16 byte push-constant block.
    PushConstants,
}

impl FragmentVariant {
    pub fn needs_push_constants(self) -> bool {
        matches!(self, FragmentVariant::PushConstants)
    }

    pub fn debug_name(self) -> &'static str {
        match self {
            FragmentVariant::Simple => "fullscreen_Simple",
            FragmentVariant::PushConstants => "fullscreen_PushConstants",
        }
    }

    pub fn spirv(self) -> Result<Arc<[u32]>> {
        match self {
            FragmentVariant::Simple => load_spirv(FULLSCREEN_SIMPLE_FRAG),
            FragmentVariant::PushConstants => load_spirv(FULLSCREEN_PUSH_CONSTANTS_FRAG),
        }
    }
}

/// Vertex program emitting a full-screen triangle from `gl_VertexIndex`.
pub fn fullscreen_vertex_spirv() -> Result<Arc<[u32]>> {
    load_spirv(FULLSCREEN_VERT)
}

fn load_spirv(bytes: &[u8]) -> Result<Arc<[u32]>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
    Ok(words.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn embedded_modules_are_spirv() {
        for words in [
            fullscreen_vertex_spirv().unwrap(),
            FragmentVariant::Simple.spirv().unwrap(),
            FragmentVariant::PushConstants.spirv().unwrap(),
        ] {
            assert_eq!(words[0], SPIRV_MAGIC);
        }
    }

    #[test]
    fn only_push_constant_variant_needs_range() {
        assert!(FragmentVariant::PushConstants.needs_push_constants());
        assert!(!FragmentVariant::Simple.needs_push_constants());
    }
}
