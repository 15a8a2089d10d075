//! Contains the PlaneMapper struct, which describes a relationship
//! between the integral plane of the canvas, with an origin at 0,0 in
//! the upper-left corner, and the complex plane around the center of
//! a view.  Also contains the rectangles the canvas is cut into.
use itertools::iproduct;
use num::Complex;

/// The width and height of a pixel buffer.  A tile's buffer may be
/// smaller than the tile itself, when it's a preview.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl Resolution {
    /// Constructor.
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    /// The number of pixels; this is what "higher resolution" means.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A rectangle on the canvas, in pixels.  Positions may go negative
/// once the viewport pans away from where a tile was computed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Constructor.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// The resolution of a full-quality buffer for this rectangle.
    pub fn full_resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Does the (continuous) point fall inside?  Both edges count.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (left, top) = (f64::from(self.x), f64::from(self.y));
        left <= x
            && x <= left + f64::from(self.width)
            && top <= y
            && y <= top + f64::from(self.height)
    }

    /// Moves the rectangle.
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Given a point on the canvas inside this rectangle and a buffer
    /// of some resolution covering it, returns the offset into the
    /// buffer of the cell the point falls in.
    pub fn buffer_index(&self, x: f64, y: f64, resolution: Resolution) -> usize {
        let cell = |pos: f64, origin: i32, extent: u32, cells: u32| -> usize {
            if extent == 0 || cells == 0 {
                return 0;
            }
            let local = (pos.floor() - f64::from(origin)).max(0.0);
            let scaled = (local * f64::from(cells) / f64::from(extent)) as usize;
            scaled.min(cells as usize - 1)
        };
        let column = cell(x, self.x, self.width, resolution.width);
        let row = cell(y, self.y, self.height, resolution.height);
        row * resolution.width as usize + column
    }

    /// The canvas pixel that the buffer cell `(column, row)` samples,
    /// for a buffer of the given resolution.
    pub fn sample_pixel(&self, column: u32, row: u32, resolution: Resolution) -> Pixel {
        let scale = |cell: u32, extent: u32, cells: u32| -> i64 {
            i64::from(cell) * i64::from(extent) / i64::from(cells.max(1))
        };
        Pixel(
            i64::from(self.x) + scale(column, self.width, resolution.width),
            i64::from(self.y) + scale(row, self.height, resolution.height),
        )
    }

    /// Cuts a canvas into tiles of at most `tile` pixels a side, row
    /// by row.  Tiles on the right and bottom edges are whatever is
    /// left over.
    pub fn grid(canvas: Resolution, tile: u32) -> Vec<Rect> {
        let tile = tile.max(1);
        let count = |length: u32| length / tile + u32::from(length % tile != 0);
        let (columns, rows) = (count(canvas.width), count(canvas.height));
        iproduct!(0..rows, 0..columns)
            .map(|(row, column)| {
                let (x, y) = (column * tile, row * tile);
                Rect::new(
                    x as i32,
                    y as i32,
                    tile.min(canvas.width - x),
                    tile.min(canvas.height - y),
                )
            })
            .collect()
    }
}

/// Describes the x, y of a pixel on the canvas.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pixel(pub i64, pub i64);

/// Contains the definitions of two planes: the integral plane of the
/// canvas, and the complex plane around a view's center.  Maps points
/// from one to the other.  Rows count downward while the imaginary
/// axis counts upward, so row 0 is the top of the view.
#[derive(Debug)]
pub struct PlaneMapper {
    /// The size of the canvas.
    pub canvas: Resolution,
    /// The point at the middle of the canvas.
    pub center: Complex<f64>,
    // The width and height of one pixel on the complex plane.
    pixel_size: f64,
}

impl PlaneMapper {
    /// Constructor.  The radius spans half of the canvas's shorter
    /// side.
    pub fn new(canvas: Resolution, center: Complex<f64>, radius: f64) -> PlaneMapper {
        let short_side = f64::from(canvas.width.min(canvas.height).max(1));
        PlaneMapper {
            canvas,
            center,
            pixel_size: 2.0 * radius / short_side,
        }
    }

    /// The width and height of one pixel on the complex plane.
    pub fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    /// The distance on the complex plane from the center of the view
    /// to the given pixel.  Perturbation works entirely in these
    /// small offsets, which stay precise long after the absolute
    /// coordinates have run out of bits.
    pub fn pixel_to_delta(&self, pixel: &Pixel) -> Complex<f64> {
        let half_w = f64::from(self.canvas.width) / 2.0;
        let half_h = f64::from(self.canvas.height) / 2.0;
        Complex::new(
            (pixel.0 as f64 - half_w) * self.pixel_size,
            (half_h - pixel.1 as f64) * self.pixel_size,
        )
    }

    /// Given a pixel on the canvas, map that as closely as possible
    /// to a point on the complex cartesian plane.
    pub fn pixel_to_point(&self, pixel: &Pixel) -> Complex<f64> {
        self.center + self.pixel_to_delta(pixel)
    }

    /// Given a point on the complex plane, map that to the pixel it
    /// falls in.
    pub fn point_to_pixel(&self, point: &Complex<f64>) -> Pixel {
        let half_w = f64::from(self.canvas.width) / 2.0;
        let half_h = f64::from(self.canvas.height) / 2.0;
        let left = (point.re - self.center.re) / self.pixel_size + half_w;
        let top = half_h - (point.im - self.center.im) / self.pixel_size;
        Pixel(left.floor() as i64, top.floor() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_to_point_on_square_canvas() {
        let pm = PlaneMapper::new(Resolution::new(4, 4), Complex::new(0.0, 0.0), 2.0);
        assert_eq!(pm.pixel_to_point(&Pixel(2, 2)), Complex::new(0.0, 0.0));
        assert_eq!(pm.pixel_to_point(&Pixel(0, 0)), Complex::new(-2.0, 2.0));
        assert_eq!(pm.pixel_to_point(&Pixel(4, 4)), Complex::new(2.0, -2.0));
    }

    #[test]
    fn radius_spans_the_short_side() {
        let pm = PlaneMapper::new(Resolution::new(8, 4), Complex::new(1.0, 1.0), 2.0);
        assert_eq!(pm.pixel_size(), 1.0);
        assert_eq!(pm.pixel_to_point(&Pixel(0, 2)), Complex::new(-3.0, 1.0));
    }

    #[test]
    fn point_to_pixel_inverts_pixel_to_point() {
        let pm = PlaneMapper::new(Resolution::new(640, 480), Complex::new(-0.5, 0.0), 1.5);
        for &p in &[Pixel(0, 0), Pixel(320, 240), Pixel(639, 479), Pixel(17, 401)] {
            let mut point = pm.pixel_to_point(&p);
            // Nudge into the middle of the pixel so rounding can't bite.
            point.re += pm.pixel_size() / 2.0;
            point.im -= pm.pixel_size() / 2.0;
            assert_eq!(pm.point_to_pixel(&point), p);
        }
    }

    #[test]
    fn grid_covers_the_canvas_with_ragged_edges() {
        let tiles = Rect::grid(Resolution::new(250, 130), 100);
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[0], Rect::new(0, 0, 100, 100));
        assert_eq!(tiles[2], Rect::new(200, 0, 50, 100));
        assert_eq!(tiles[5], Rect::new(200, 100, 50, 30));
        let area: u64 = tiles.iter().map(|t| t.full_resolution().area()).sum();
        assert_eq!(area, 250 * 130);
    }

    #[test]
    fn grid_with_an_enormous_tile_is_one_tile() {
        let canvas = Resolution::new(250, 130);
        assert_eq!(Rect::grid(canvas, u32::MAX), vec![Rect::new(0, 0, 250, 130)]);
        assert!(Rect::grid(Resolution::new(0, 130), u32::MAX).is_empty());
    }

    #[test]
    fn buffer_index_scales_into_lower_resolutions() {
        let rect = Rect::new(10, 20, 8, 8);
        assert_eq!(rect.buffer_index(10.0, 20.0, rect.full_resolution()), 0);
        assert_eq!(rect.buffer_index(17.5, 27.9, rect.full_resolution()), 63);
        assert_eq!(rect.buffer_index(18.0, 28.0, rect.full_resolution()), 63);
        let preview = Resolution::new(2, 2);
        assert_eq!(rect.buffer_index(13.0, 20.0, preview), 0);
        assert_eq!(rect.buffer_index(14.0, 20.0, preview), 1);
        assert_eq!(rect.buffer_index(14.0, 24.0, preview), 3);
    }

    #[test]
    fn sample_pixel_spreads_cells_over_the_rect() {
        let rect = Rect::new(10, 20, 8, 8);
        let preview = Resolution::new(2, 2);
        assert_eq!(rect.sample_pixel(0, 0, preview), Pixel(10, 20));
        assert_eq!(rect.sample_pixel(1, 1, preview), Pixel(14, 24));
    }

    #[test]
    fn contains_includes_edges() {
        let rect = Rect::new(0, 0, 10, 10);
        assert!(rect.contains(0.0, 0.0));
        assert!(rect.contains(10.0, 10.0));
        assert!(!rect.contains(10.5, 3.0));
        assert!(!rect.contains(-0.1, 3.0));
    }
}
