//! Line blitter
//!
//! Lays characters out on a fixed advance grid and composites their coverage
//! into a pixel view. Glyph metrics never influence the pen position.

use crate::glyph::{Glyph, GlyphSource};
use crate::shm::PixelView;
use tracing::debug;

/// Scale a coverage byte by `alpha`, truncating
pub fn scale_coverage(coverage: u8, alpha: u8) -> u8 {
    (coverage as u32 * alpha as u32 / 256) as u8
}

/// Packed pixel with the scaled coverage in all four channels
pub fn compose(coverage: u8, alpha: u8) -> u32 {
    u32::from_ne_bytes([scale_coverage(coverage, alpha); 4])
}

/// Outcome of drawing one line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub drawn: usize,
    pub skipped: usize,
}

/// Blit `glyph` with its pen at `pen_x` on `baseline_y`
pub fn blit_glyph(view: &mut PixelView<'_>, glyph: &Glyph, pen_x: i32, baseline_y: i32, alpha: u8) {
    let origin_x = pen_x + glyph.left;
    let origin_y = baseline_y - glyph.top;
    for row in 0..glyph.rows {
        for col in 0..glyph.width {
            let value = compose(glyph.coverage_at(col, row), alpha);
            view.put(origin_x + col as i32, origin_y + row as i32, value);
        }
    }
}

/// Draw `text` left to right starting at x = 0.
///
/// Each character takes `advance` pixels whether or not it rendered, and
/// drawing stops once the pen reaches the right edge.
pub fn draw_line<G: GlyphSource + ?Sized>(
    view: &mut PixelView<'_>,
    glyphs: &mut G,
    text: &str,
    baseline_y: i32,
    alpha: u8,
    advance: u32,
) -> LineStats {
    let mut stats = LineStats::default();
    let mut pen_x: u32 = 0;

    for code in text.chars() {
        if pen_x >= view.width() {
            break;
        }

        match glyphs.rasterize(code) {
            Ok(glyph) => {
                blit_glyph(view, &glyph, pen_x as i32, baseline_y, alpha);
                stats.drawn += 1;
            }
            Err(e) => {
                debug!("Skipping character at x={}: {}", pen_x, e);
                stats.skipped += 1;
            }
        }

        pen_x = pen_x.saturating_add(advance);
    }

    stats
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::glyph::GlyphError;

    /// Synthetic glyphs: a solid 6x8 box sitting on the baseline for every
    /// printable char, empty for spaces, and a failure for anything in `missing`.
    pub(crate) struct BoxGlyphs {
        pub missing: Vec<char>,
        pub requested: Vec<char>,
    }

    impl BoxGlyphs {
        pub(crate) fn new() -> Self {
            Self {
                missing: Vec::new(),
                requested: Vec::new(),
            }
        }
    }

    pub(crate) const BOX_W: u32 = 6;
    pub(crate) const BOX_H: u32 = 8;

    impl GlyphSource for BoxGlyphs {
        fn rasterize(&mut self, code: char) -> Result<Glyph, GlyphError> {
            self.requested.push(code);
            if self.missing.contains(&code) {
                return Err(GlyphError::Missing(code));
            }
            if code == ' ' {
                return Ok(Glyph::empty());
            }
            Ok(Glyph {
                width: BOX_W,
                rows: BOX_H,
                left: 1,
                top: BOX_H as i32,
                coverage: vec![0xff; (BOX_W * BOX_H) as usize],
            })
        }
    }

    fn canvas(width: u32, height: u32) -> Vec<u8> {
        vec![0u8; (width * height * 4) as usize]
    }

    fn lit_columns(view: &PixelView<'_>) -> Vec<i32> {
        let mut cols: Vec<i32> = (0..view.width() as i32)
            .filter(|&x| (0..view.height() as i32).any(|y| view.pixel(x, y) != Some(0)))
            .collect();
        cols.dedup();
        cols
    }

    #[test]
    fn test_compose_channels_equal() {
        for (v, a) in [(255u8, 0x10u8), (128, 200), (1, 255), (255, 255), (77, 3)] {
            let scaled = (v as u32 * a as u32 / 256) as u8;
            assert_eq!(compose(v, a).to_ne_bytes(), [scaled; 4]);
        }
    }

    #[test]
    fn test_compose_zero_is_transparent() {
        assert_eq!(compose(0, 255), 0);
        assert_eq!(compose(255, 0), 0);
        // 255 * 1 / 256 truncates to zero as well
        assert_eq!(compose(255, 1), 0);
    }

    #[test]
    fn test_full_coverage_at_ghost_alpha() {
        assert_eq!(scale_coverage(0xff, 0x10), 0x0f);
    }

    #[test]
    fn test_glyph_placement_relative_to_baseline() {
        let mut data = canvas(20, 20);
        let mut view = PixelView::new(&mut data, 20, 20, 80);
        let glyph = Glyph {
            width: 1,
            rows: 1,
            left: 2,
            top: 5,
            coverage: vec![0xff],
        };
        blit_glyph(&mut view, &glyph, 10, 15, 0xff);
        assert_ne!(view.pixel(12, 10), Some(0));
        assert_eq!(view.pixel(11, 10), Some(0));
    }

    #[test]
    fn test_line_uses_fixed_advance() {
        let mut data = canvas(200, 60);
        let mut view = PixelView::new(&mut data, 200, 60, 800);
        let mut glyphs = BoxGlyphs::new();

        let stats = draw_line(&mut view, &mut glyphs, "A now", 36, 0x10, 10);

        assert_eq!(stats, LineStats { drawn: 5, skipped: 0 });
        // 'A' at 0, space at 10, 'n' at 20, 'o' at 30, 'w' at 40; box starts at left=1
        let mut expected = Vec::new();
        for pen in [0, 20, 30, 40] {
            expected.extend(pen + 1..pen + 1 + BOX_W as i32);
        }
        assert_eq!(lit_columns(&view), expected);
        // Nothing past the last glyph's box
        assert!(lit_columns(&view).iter().all(|&x| x < 47));
    }

    #[test]
    fn test_line_rows_sit_above_baseline() {
        let mut data = canvas(40, 60);
        let mut view = PixelView::new(&mut data, 40, 60, 160);
        let mut glyphs = BoxGlyphs::new();

        draw_line(&mut view, &mut glyphs, "A", 36, 0x10, 10);

        assert_eq!(view.pixel(1, 28), Some(compose(0xff, 0x10)));
        assert_eq!(view.pixel(1, 35), Some(compose(0xff, 0x10)));
        assert_eq!(view.pixel(1, 27), Some(0));
        assert_eq!(view.pixel(1, 36), Some(0));
    }

    #[test]
    fn test_missing_glyph_leaves_gap() {
        let mut data = canvas(100, 40);
        let mut view = PixelView::new(&mut data, 100, 40, 400);
        let mut glyphs = BoxGlyphs::new();
        glyphs.missing.push('c');

        let stats = draw_line(&mut view, &mut glyphs, "abcde", 20, 0x80, 10);

        assert_eq!(stats, LineStats { drawn: 4, skipped: 1 });
        assert_eq!(glyphs.requested, vec!['a', 'b', 'c', 'd', 'e']);
        let cols = lit_columns(&view);
        assert!(cols.contains(&11));
        assert!(!(20..30).any(|x| cols.contains(&x)));
        assert!(cols.contains(&31));
        assert!(cols.contains(&41));
    }

    #[test]
    fn test_stops_at_right_edge() {
        let mut data = canvas(25, 20);
        let mut view = PixelView::new(&mut data, 25, 20, 100);
        let mut glyphs = BoxGlyphs::new();

        let stats = draw_line(&mut view, &mut glyphs, "abcdef", 12, 0xff, 10);

        // Pens at 0, 10, 20; pen 30 is past the edge
        assert_eq!(stats.drawn, 3);
        assert_eq!(glyphs.requested.len(), 3);
    }

    #[test]
    fn test_glyph_clipped_at_bottom_edge() {
        let mut data = canvas(20, 5);
        let mut view = PixelView::new(&mut data, 20, 5, 80);
        let mut glyphs = BoxGlyphs::new();

        // Baseline below the view: the box straddles the bottom edge
        draw_line(&mut view, &mut glyphs, "x", 8, 0xff, 10);

        assert_eq!(view.pixel(1, 4), Some(compose(0xff, 0xff)));
        assert_eq!(view.pixel(1, 0), Some(compose(0xff, 0xff)));
    }
}
