//! CPU pixel operations shared by the devices that keep pixels in host memory
//!
//! Planes are row-major with no padding; sizes are `(width, height)`.

use super::Rect;
use op_core::ThreadPool;

/// Copy `src_rect` of `src` to `(dst_x, dst_y)` of `dst`, clipped to both planes
pub fn copy_rect<T: Copy>(
    src: &[T],
    src_size: (u32, u32),
    src_rect: Rect,
    dst: &mut [T],
    dst_size: (u32, u32),
    dst_pos: (u32, u32),
) {
    let rect = src_rect.clip_to(src_size.0, src_size.1);
    let (dst_x, dst_y) = dst_pos;
    if dst_x >= dst_size.0 || dst_y >= dst_size.1 {
        return;
    }
    let w = rect.w.min(dst_size.0 - dst_x) as usize;
    let h = rect.h.min(dst_size.1 - dst_y) as usize;

    for row in 0..h {
        let s = (rect.y as usize + row) * src_size.0 as usize + rect.x as usize;
        let d = (dst_y as usize + row) * dst_size.0 as usize + dst_x as usize;
        dst[d..d + w].copy_from_slice(&src[s..s + w]);
    }
}

/// Fill a rectangle, clipped to the plane
pub fn fill_rect<T: Copy>(plane: &mut [T], size: (u32, u32), rect: Rect, value: T) {
    let rect = rect.clip_to(size.0, size.1);
    for row in rect.y..rect.y + rect.h {
        let start = (row * size.0 + rect.x) as usize;
        plane[start..start + rect.w as usize].fill(value);
    }
}

/// Apply one stencil reconstruction pass
///
/// Pixels are matched one to one over the overlap of the two planes.
pub fn stencil_pass(
    color: &[u32],
    color_size: (u32, u32),
    stencil: &mut [u8],
    stencil_size: (u32, u32),
    write_mask: u8,
    test_value: u8,
) {
    let w = color_size.0.min(stencil_size.0) as usize;
    let h = color_size.1.min(stencil_size.1) as usize;
    for y in 0..h {
        let src_row = &color[y * color_size.0 as usize..][..w];
        let dst_row = &mut stencil[y * stencil_size.0 as usize..][..w];
        for (s, &c) in dst_row.iter_mut().zip(src_row) {
            let alpha = (c >> 24) as u8;
            if alpha & test_value != 0 {
                *s = (*s & !write_mask) | write_mask;
            }
        }
    }
}

/// Nearest-neighbour scaled blit of the `uv` region of `src` into `dst_rect`
pub fn blit_scaled(
    pool: &ThreadPool,
    src: &[u32],
    src_size: (u32, u32),
    uv: [f32; 4],
    dst: &mut [u32],
    dst_size: (u32, u32),
    dst_rect: Rect,
) {
    let rect = dst_rect.clip_to(dst_size.0, dst_size.1);
    if rect.is_empty() || src_size.0 == 0 || src_size.1 == 0 {
        return;
    }

    // Scale against the unclipped rectangle so clipping does not stretch
    let full_w = dst_rect.w as f32;
    let full_h = dst_rect.h as f32;
    let row_len = dst_size.0 as usize;

    pool.parallel_rows_mut(dst, row_len, |first_row, rows| {
        for (i, row) in rows.chunks_mut(row_len).enumerate() {
            let y = (first_row + i) as u32;
            if y < rect.y || y >= rect.y + rect.h {
                continue;
            }
            let fy = (y - dst_rect.y) as f32 + 0.5;
            let v = uv[1] + (uv[3] - uv[1]) * fy / full_h;
            let sy = ((v * src_size.1 as f32) as i64).clamp(0, src_size.1 as i64 - 1) as usize;
            let src_row = &src[sy * src_size.0 as usize..][..src_size.0 as usize];

            for x in rect.x..rect.x + rect.w {
                let fx = (x - dst_rect.x) as f32 + 0.5;
                let u = uv[0] + (uv[2] - uv[0]) * fx / full_w;
                let sx = ((u * src_size.0 as f32) as i64).clamp(0, src_size.0 as i64 - 1) as usize;
                row[x as usize] = src_row[sx];
            }
        }
    });
}
