//! Fixed 2D blit program used to present framebuffers

use super::depal_gen::ShaderLanguage;

/// Pass-through pixel shader sampling texture stage 0
pub fn generate_blit_pixel_shader(language: ShaderLanguage) -> String {
    match language {
        ShaderLanguage::GlslEs300 => concat!(
            "#version 300 es\n",
            "precision mediump float;\n",
            "in vec2 v_texcoord;\n",
            "uniform sampler2D tex;\n",
            "out vec4 fragColor;\n",
            "void main() {\n",
            "  fragColor = texture(tex, v_texcoord);\n",
            "}\n"
        )
        .to_string(),
        ShaderLanguage::Glsl450Vulkan => concat!(
            "#version 450\n",
            "layout(location = 0) in vec2 v_texcoord;\n",
            "layout(set = 0, binding = 0) uniform sampler2D tex;\n",
            "layout(location = 0) out vec4 fragColor;\n",
            "void main() {\n",
            "  fragColor = texture(tex, v_texcoord);\n",
            "}\n"
        )
        .to_string(),
        ShaderLanguage::HlslD3d9 => concat!(
            "sampler tex : register(s0);\n",
            "float4 main(float2 v_texcoord : TEXCOORD0) : COLOR0 {\n",
            "  return tex2D(tex, v_texcoord);\n",
            "}\n"
        )
        .to_string(),
        ShaderLanguage::HlslD3d11 => concat!(
            "Texture2D<float4> tex : register(t0);\n",
            "SamplerState texSamp : register(s0);\n",
            "float4 main(in float2 v_texcoord : TEXCOORD0) : SV_Target {\n",
            "  return tex.Sample(texSamp, v_texcoord);\n",
            "}\n"
        )
        .to_string(),
    }
}
