//! Shader identity and source generation

pub mod blit_gen;
pub mod depal_gen;
pub mod id;

pub use blit_gen::generate_blit_pixel_shader;
pub use depal_gen::{
    depal_float_supported, generate_depal_shader, generate_depal_vertex_shader, ShaderLanguage,
    CLUT_TEXTURE_STAGE,
};
pub use id::{ClutId, ShaderId};
