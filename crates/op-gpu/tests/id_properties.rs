//! Property tests for shader and CLUT key derivation

use op_gpu::{ClutId, GePaletteFormat, PixelFormat, ShaderId};
use proptest::prelude::*;

fn palette_format() -> impl Strategy<Value = GePaletteFormat> {
    (0u32..4).prop_map(GePaletteFormat::from_raw)
}

fn pixel_format() -> impl Strategy<Value = PixelFormat> {
    (0usize..PixelFormat::ALL.len()).prop_map(|i| PixelFormat::ALL[i])
}

proptest! {
    #[test]
    fn test_shader_id_is_deterministic(clut_mode in any::<u32>(), format in pixel_format()) {
        prop_assert_eq!(ShaderId::generate(clut_mode, format), ShaderId::generate(clut_mode, format));
    }

    #[test]
    fn test_shader_id_round_trips_fields(clut_mode in 0u32..0x0100_0000, format in pixel_format()) {
        let id = ShaderId::generate(clut_mode, format);
        prop_assert_eq!(id.clut_mode().raw(), clut_mode);
        prop_assert_eq!(id.pixel_format(), Some(format));
        prop_assert_eq!(ShaderId::from_hex(&id.to_string()), Some(id));
    }

    #[test]
    fn test_distinct_shader_inputs_never_collide(
        a in (0u32..0x0100_0000, pixel_format()),
        b in (0u32..0x0100_0000, pixel_format()),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(ShaderId::generate(a.0, a.1), ShaderId::generate(b.0, b.1));
    }

    #[test]
    fn test_clut_id_separates_hashes(format in palette_format(), hash in any::<u32>(), bit in 0u32..32) {
        // Neighbouring hashes differing in one bit
        let other = hash ^ (1 << bit);
        prop_assert_ne!(ClutId::new(format, hash), ClutId::new(format, other));
        prop_assert_ne!(ClutId::new(format, hash), ClutId::new(format, hash.wrapping_add(1)));
    }

    #[test]
    fn test_clut_id_separates_formats(a in palette_format(), b in palette_format(), hash in any::<u32>()) {
        prop_assume!(a != b);
        prop_assert_ne!(ClutId::new(a, hash), ClutId::new(b, hash));
    }

    #[test]
    fn test_clut_id_keeps_both_parts(format in palette_format(), hash in any::<u32>()) {
        let id = ClutId::new(format, hash);
        prop_assert_eq!(id.format(), format);
        prop_assert_eq!(id.hash(), hash);
    }
}
