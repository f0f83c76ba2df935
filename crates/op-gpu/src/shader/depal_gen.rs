//! Depalettize shader source generation
//!
//! The pixel shader samples the source texture, rebuilds the integer index
//! the GE would have read from it, applies the CLUT shift/mask/start fields
//! and looks the result up in the palette texture bound as `pal`.
//!
//! Generation is a pure function of the shader id and the target language.

use super::id::ShaderId;
use crate::ge_constants::PixelFormat;

/// Output language of the generators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    /// OpenGL ES 3.00
    GlslEs300,
    /// Vulkan-flavoured GLSL 4.50
    Glsl450Vulkan,
    /// Direct3D 9 (shader model 3, no integer ops)
    HlslD3d9,
    /// Direct3D 11 (shader model 4+)
    HlslD3d11,
}

impl ShaderLanguage {
    pub fn has_integer_ops(self) -> bool {
        !matches!(self, Self::HlslD3d9)
    }

    pub fn is_glsl(self) -> bool {
        matches!(self, Self::GlslEs300 | Self::Glsl450Vulkan)
    }
}

/// Texture unit the palette is bound to
pub const CLUT_TEXTURE_STAGE: u32 = 3;

// (channel, first bit, bit count) of each source format, low bits first
type Channel = (&'static str, u32, u32);

const LAYOUT_565: &[Channel] = &[("r", 0, 5), ("g", 5, 6), ("b", 11, 5)];
const LAYOUT_5551: &[Channel] = &[("r", 0, 5), ("g", 5, 5), ("b", 10, 5), ("a", 15, 1)];
const LAYOUT_4444: &[Channel] = &[("r", 0, 4), ("g", 4, 4), ("b", 8, 4), ("a", 12, 4)];
const LAYOUT_8888: &[Channel] = &[("r", 0, 8), ("g", 8, 8), ("b", 16, 8), ("a", 24, 8)];
const LAYOUT_8: &[Channel] = &[("r", 0, 8)];
const LAYOUT_16: &[Channel] = &[("r", 0, 8), ("g", 8, 8)];

fn channel_layout(format: PixelFormat) -> &'static [Channel] {
    match format {
        PixelFormat::Rgb565 => LAYOUT_565,
        PixelFormat::Rgba5551 => LAYOUT_5551,
        PixelFormat::Rgba4444 => LAYOUT_4444,
        PixelFormat::Rgba8888 | PixelFormat::Clut32 => LAYOUT_8888,
        PixelFormat::Clut4 | PixelFormat::Clut8 => LAYOUT_8,
        PixelFormat::Clut16 => LAYOUT_16,
    }
}

fn mask_bits(mask: u32) -> u32 {
    32 - mask.leading_zeros()
}

fn channel_max(bits: u32) -> f32 {
    ((1u32 << bits) - 1) as f32
}

/// Channels whose bits overlap `mask << shift`
fn touched_channels(format: PixelFormat, shift: u32, mask: u32) -> impl Iterator<Item = Channel> {
    let width = mask_bits(mask);
    channel_layout(format)
        .iter()
        .copied()
        .filter(move |&(_, offset, bits)| width > 0 && offset < shift + width && offset + bits > shift)
}

/// Index fields decoded from an id, plus the palette width
struct DepalParams {
    format: PixelFormat,
    shift: u32,
    mask: u32,
    start: u32,
    clut_width: u32,
}

impl DepalParams {
    fn from_id(id: ShaderId) -> Self {
        let mode = id.clut_mode();
        Self {
            format: id.pixel_format().unwrap_or(PixelFormat::Clut8),
            shift: mode.index_shift(),
            mask: mode.index_mask(),
            start: mode.index_start(),
            clut_width: mode.palette_format().texture_width(),
        }
    }

    /// The single channel the float path reads, if the fields allow one
    fn float_channel(&self) -> Option<Option<Channel>> {
        if self.mask == 0 {
            return Some(None);
        }
        // Needs a contiguous low mask that does not overlap the start bits
        if self.mask & (self.mask + 1) != 0 || self.mask & self.start != 0 {
            return None;
        }
        let width = mask_bits(self.mask);
        channel_layout(self.format)
            .iter()
            .copied()
            .find(|&(_, offset, bits)| offset <= self.shift && self.shift + width <= offset + bits)
            .map(Some)
    }
}

/// Whether the float-only path can express this id exactly
pub fn depal_float_supported(id: ShaderId) -> bool {
    DepalParams::from_id(id).float_channel().is_some()
}

fn write_integer_body(out: &mut String, params: &DepalParams, language: ShaderLanguage) {
    let glsl = language.is_glsl();
    out.push_str(if glsl {
        "  vec4 color = texture(tex, v_texcoord);\n"
    } else {
        "  float4 color = tex.Sample(texSamp, v_texcoord);\n"
    });
    out.push_str("  uint raw = 0u;\n");
    for (channel, offset, bits) in touched_channels(params.format, params.shift, params.mask) {
        out.push_str(&format!(
            "  raw |= uint(color.{} * {:.1} + 0.5) << {}u;\n",
            channel,
            channel_max(bits),
            offset
        ));
    }
    out.push_str(&format!(
        "  uint index = ((raw >> {}u) & 0x{:02x}u) | {}u;\n",
        params.shift, params.mask, params.start
    ));
    let coord = format!("(float(index) + 0.5) / {:.1}", params.clut_width as f32);
    if glsl {
        out.push_str(&format!("  fragColor = texture(pal, vec2({}, 0.0));\n", coord));
    } else {
        out.push_str(&format!("  return pal.Sample(palSamp, float2({}, 0.0));\n", coord));
    }
}

fn write_float_body(out: &mut String, params: &DepalParams) {
    out.push_str("  float4 color = tex2D(tex, v_texcoord);\n");
    match params.float_channel() {
        Some(Some((channel, offset, bits))) => {
            let divisor = (1u64 << (params.shift - offset)) as f64;
            let modulus = (params.mask + 1) as f64;
            out.push_str(&format!(
                "  float value = floor(color.{} * {:.1} + 0.5);\n",
                channel,
                channel_max(bits)
            ));
            out.push_str(&format!(
                "  float index = floor(fract(floor(value / {:.1}) / {:.1}) * {:.1} + 0.5) + {:.1};\n",
                divisor, modulus, modulus, params.start as f64
            ));
        }
        // A zero mask, or a combination the float path cannot express
        _ => {
            out.push_str(&format!("  float index = {:.1};\n", params.start as f64));
        }
    }
    out.push_str(&format!(
        "  return tex2D(pal, float2((index + 0.5) / {:.1}, 0.0));\n",
        params.clut_width as f32
    ));
}

/// Generate the depalettize pixel shader for `id`
pub fn generate_depal_shader(id: ShaderId, language: ShaderLanguage) -> String {
    let params = DepalParams::from_id(id);
    let mut out = String::with_capacity(1024);
    out.push_str(&format!("// depal {} ({})\n", id, params.format.name()));

    match language {
        ShaderLanguage::GlslEs300 => {
            out.push_str("#version 300 es\n");
            out.push_str("precision highp float;\n");
            out.push_str("precision highp int;\n");
            out.push_str("in vec2 v_texcoord;\n");
            out.push_str("uniform sampler2D tex;\n");
            out.push_str("uniform sampler2D pal;\n");
            out.push_str("out vec4 fragColor;\n");
            out.push_str("void main() {\n");
            write_integer_body(&mut out, &params, language);
            out.push_str("}\n");
        }
        ShaderLanguage::Glsl450Vulkan => {
            out.push_str("#version 450\n");
            out.push_str("#extension GL_ARB_separate_shader_objects : enable\n");
            out.push_str("layout(location = 0) in vec2 v_texcoord;\n");
            out.push_str("layout(set = 0, binding = 0) uniform sampler2D tex;\n");
            out.push_str("layout(set = 0, binding = 1) uniform sampler2D pal;\n");
            out.push_str("layout(location = 0) out vec4 fragColor;\n");
            out.push_str("void main() {\n");
            write_integer_body(&mut out, &params, language);
            out.push_str("}\n");
        }
        ShaderLanguage::HlslD3d11 => {
            out.push_str("Texture2D<float4> tex : register(t0);\n");
            out.push_str("SamplerState texSamp : register(s0);\n");
            out.push_str(&format!("Texture2D<float4> pal : register(t{});\n", CLUT_TEXTURE_STAGE));
            out.push_str(&format!("SamplerState palSamp : register(s{});\n", CLUT_TEXTURE_STAGE));
            out.push_str("float4 main(in float2 v_texcoord : TEXCOORD0) : SV_Target {\n");
            write_integer_body(&mut out, &params, language);
            out.push_str("}\n");
        }
        ShaderLanguage::HlslD3d9 => {
            out.push_str("sampler tex : register(s0);\n");
            out.push_str(&format!("sampler pal : register(s{});\n", CLUT_TEXTURE_STAGE));
            out.push_str("float4 main(float2 v_texcoord : TEXCOORD0) : COLOR0 {\n");
            write_float_body(&mut out, &params);
            out.push_str("}\n");
        }
    }

    out
}

/// Generate the full-screen pass vertex shader
pub fn generate_depal_vertex_shader(language: ShaderLanguage) -> String {
    match language {
        ShaderLanguage::GlslEs300 => concat!(
            "#version 300 es\n",
            "in vec4 a_position;\n",
            "in vec2 a_texcoord0;\n",
            "out vec2 v_texcoord;\n",
            "void main() {\n",
            "  v_texcoord = a_texcoord0;\n",
            "  gl_Position = a_position;\n",
            "}\n"
        )
        .to_string(),
        ShaderLanguage::Glsl450Vulkan => concat!(
            "#version 450\n",
            "#extension GL_ARB_separate_shader_objects : enable\n",
            "layout(location = 0) in vec4 a_position;\n",
            "layout(location = 1) in vec2 a_texcoord0;\n",
            "layout(location = 0) out vec2 v_texcoord;\n",
            "void main() {\n",
            "  v_texcoord = a_texcoord0;\n",
            "  gl_Position = a_position;\n",
            "}\n"
        )
        .to_string(),
        ShaderLanguage::HlslD3d9 => concat!(
            "struct VS_IN { float4 a_position : POSITION; float2 a_texcoord0 : TEXCOORD0; };\n",
            "struct VS_OUT { float4 Position : POSITION; float2 Texcoord : TEXCOORD0; };\n",
            "VS_OUT main(VS_IN input) {\n",
            "  VS_OUT output;\n",
            "  output.Texcoord = input.a_texcoord0;\n",
            "  output.Position = input.a_position;\n",
            "  return output;\n",
            "}\n"
        )
        .to_string(),
        ShaderLanguage::HlslD3d11 => concat!(
            "struct VS_IN { float4 a_position : POSITION; float2 a_texcoord0 : TEXCOORD0; };\n",
            "struct VS_OUT { float2 Texcoord : TEXCOORD0; float4 Position : SV_Position; };\n",
            "VS_OUT main(VS_IN input) {\n",
            "  VS_OUT output;\n",
            "  output.Texcoord = input.a_texcoord0;\n",
            "  output.Position = input.a_position;\n",
            "  return output;\n",
            "}\n"
        )
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ge_constants::{ClutMode, GePaletteFormat};

    fn id(format: GePaletteFormat, shift: u32, mask: u32, start: u32, pixel: PixelFormat) -> ShaderId {
        ShaderId::generate(ClutMode::new(format, shift, mask, start).raw(), pixel)
    }

    #[test]
    fn test_glsl_clut8_reads_red_only() {
        let src = generate_depal_shader(
            id(GePaletteFormat::Abgr8888, 0, 0xFF, 0, PixelFormat::Clut8),
            ShaderLanguage::GlslEs300,
        );
        assert!(src.contains("#version 300 es"));
        assert!(src.contains("uniform sampler2D pal;"));
        assert!(src.contains("raw |= uint(color.r * 255.0 + 0.5) << 0u;"));
        assert!(!src.contains("color.g"));
        assert!(src.contains("/ 256.0"));
    }

    #[test]
    fn test_channels_follow_shift_and_mask() {
        // 4444 with shift 4 mask 0xF touches only the green nibble
        let src = generate_depal_shader(
            id(GePaletteFormat::Abgr4444, 4, 0x0F, 0, PixelFormat::Rgba4444),
            ShaderLanguage::Glsl450Vulkan,
        );
        assert!(src.contains("color.g * 15.0"));
        assert!(!src.contains("color.r"));
        assert!(!src.contains("color.b"));
        assert!(src.contains("((raw >> 4u) & 0x0fu) | 0u"));
        assert!(src.contains("/ 512.0"));
    }

    #[test]
    fn test_start_position_is_applied() {
        let src = generate_depal_shader(
            id(GePaletteFormat::Abgr5551, 0, 0x0F, 3, PixelFormat::Clut4),
            ShaderLanguage::HlslD3d11,
        );
        assert!(src.contains("| 48u"));
        assert!(src.contains("pal.Sample(palSamp"));
        assert!(src.contains("register(t3)"));
    }

    #[test]
    fn test_float_path_single_channel() {
        let shader = id(GePaletteFormat::Abgr8888, 8, 0xFF, 0, PixelFormat::Rgba8888);
        assert!(depal_float_supported(shader));
        let src = generate_depal_shader(shader, ShaderLanguage::HlslD3d9);
        assert!(src.contains("color.g * 255.0"));
        assert!(src.contains("fract("));
        assert!(src.contains("tex2D(pal"));
        assert!(!src.contains("uint"));
    }

    #[test]
    fn test_float_path_rejects_cross_channel_fields() {
        // 565 with shift 3 mask 0xFF spans red and green
        let shader = id(GePaletteFormat::Bgr5650, 3, 0xFF, 0, PixelFormat::Rgb565);
        assert!(!depal_float_supported(shader));
        let src = generate_depal_shader(shader, ShaderLanguage::HlslD3d9);
        assert!(src.contains("float index = 0.0;"));
        assert!(src.contains("tex2D(pal"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let shader = id(GePaletteFormat::Abgr4444, 2, 0x3F, 1, PixelFormat::Rgba5551);
        for language in [
            ShaderLanguage::GlslEs300,
            ShaderLanguage::Glsl450Vulkan,
            ShaderLanguage::HlslD3d9,
            ShaderLanguage::HlslD3d11,
        ] {
            assert_eq!(
                generate_depal_shader(shader, language),
                generate_depal_shader(shader, language)
            );
        }
    }

    #[test]
    fn test_vertex_shader_passes_texcoord() {
        let src = generate_depal_vertex_shader(ShaderLanguage::GlslEs300);
        assert!(src.starts_with("#version 300 es"));
        assert!(src.contains("v_texcoord = a_texcoord0;"));
        assert!(generate_depal_vertex_shader(ShaderLanguage::HlslD3d11).contains("SV_Position"));
    }
}
