//! The iteration kernels that run inside workers.
//!
//! The Mandelbrot takes a point on the complex plane and repeatedly
//! squares it and adds the original point, counting how many steps it
//! takes to escape a circle of radius 2.  That count is all a tile is.
//!
//! That works until the zoom gets deep enough that neighbouring pixels
//! have the same `f64` coordinates.  Perturbation fixes this by
//! iterating one *reference* point carefully, once, and then
//! iterating each pixel only as a small delta from the reference.  The
//! deltas are tiny numbers and `f64` represents tiny numbers well.
//! When a delta grows larger than the point it's riding on, we
//! "rebase": restart the pixel against the beginning of the orbit.
//! That one trick takes care of the glitches that used to plague
//! perturbation renderers.

use num::Complex;

use crate::orbit_cache::{BlaStep, RefOrbit};
use crate::params::{to_f64, RenderMode, ViewParams};
use crate::planes::{PlaneMapper, Rect, Resolution};
use crate::worker::AbortFlag;

/// Anything past this radius (squared) is gone for good.
const ESCAPE_RADIUS_SQ: f64 = 4.0;

/// How often, in iterations, the reference orbit checks for an abort
/// and reports progress.
const ORBIT_CHECK_INTERVAL: usize = 4096;

/// The quadratic term of a perturbation step is dropped once it is
/// below this fraction of the linear term.
const BLA_EPSILON: f64 = 1.0 / ((1u64 << 53) as f64);

/// What a tile computation has to say while it runs.
#[derive(Debug, PartialEq)]
pub enum TileReport {
    /// Fraction of the full-resolution pass done.
    Progress(f64),
    /// A low-resolution version of the tile.
    Preview(Vec<u32>, Resolution),
}

/// The computation behind the workers.  Both operations give up and
/// return `None` once the abort flag is raised.
pub trait Kernel: Send + Sync {
    /// The orbit of the view's center.
    fn reference_orbit(
        &self,
        params: &ViewParams,
        abort: &AbortFlag,
        report: &mut dyn FnMut(f64),
    ) -> Option<RefOrbit>;

    /// Iteration counts for every pixel of `rect`, row by row.
    fn iterate_tile(
        &self,
        rect: Rect,
        params: &ViewParams,
        canvas: Resolution,
        orbit: Option<&RefOrbit>,
        abort: &AbortFlag,
        report: &mut dyn FnMut(TileReport),
    ) -> Option<Vec<u32>>;
}

/// Classic escape-time iteration, plain or perturbed.
#[derive(Debug, Clone)]
pub struct EscapeTimeKernel {
    // Previews are this many times coarser than the tile, on each
    // axis.  One means no preview.
    preview_divisor: u32,
}

impl Default for EscapeTimeKernel {
    fn default() -> Self {
        EscapeTimeKernel { preview_divisor: 4 }
    }
}

impl EscapeTimeKernel {
    /// A kernel that previews each tile at a quarter of its resolution.
    pub fn new() -> Self {
        EscapeTimeKernel::default()
    }

    /// Changes how much coarser previews are; 1 turns them off.
    pub fn with_preview_divisor(preview_divisor: u32) -> Self {
        EscapeTimeKernel {
            preview_divisor: preview_divisor.max(1),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill(
        &self,
        rect: Rect,
        resolution: Resolution,
        mapper: &PlaneMapper,
        params: &ViewParams,
        orbit: Option<(&RefOrbit, Complex<f64>)>,
        abort: &AbortFlag,
        progress: &mut dyn FnMut(f64),
    ) -> Option<Vec<u32>> {
        let limit = params.max_iterations;
        let mut buffer = Vec::with_capacity(resolution.area() as usize);
        for row in 0..resolution.height {
            if abort.is_raised() {
                return None;
            }
            for column in 0..resolution.width {
                let pixel = rect.sample_pixel(column, row, resolution);
                let count = match orbit {
                    Some((orbit, offset)) => {
                        perturbed_escape_time(orbit, offset + mapper.pixel_to_delta(&pixel), limit)
                    }
                    None => escape_time(mapper.pixel_to_point(&pixel), limit),
                };
                buffer.push(count);
            }
            progress(f64::from(row + 1) / f64::from(resolution.height));
        }
        Some(buffer)
    }
}

impl Kernel for EscapeTimeKernel {
    fn reference_orbit(
        &self,
        params: &ViewParams,
        abort: &AbortFlag,
        report: &mut dyn FnMut(f64),
    ) -> Option<RefOrbit> {
        let c = params.center();
        let limit = params.max_iterations as usize;
        let mut xn = Vec::with_capacity(limit + 1);
        let mut bla = Vec::with_capacity(limit + 1);
        let mut z: Complex<f64> = Complex { re: 0.0, im: 0.0 };
        for i in 0..=limit {
            if i % ORBIT_CHECK_INTERVAL == 0 {
                if abort.is_raised() {
                    return None;
                }
                report(i as f64 / (limit + 1) as f64);
            }
            xn.push(z);
            bla.push(BlaStep {
                a: z * 2.0,
                radius: 2.0 * BLA_EPSILON * z.norm(),
            });
            if z.norm_sqr() > ESCAPE_RADIUS_SQ {
                break;
            }
            z = z * z + c;
        }
        report(1.0);
        Some(RefOrbit::new(params, xn, bla))
    }

    fn iterate_tile(
        &self,
        rect: Rect,
        params: &ViewParams,
        canvas: Resolution,
        orbit: Option<&RefOrbit>,
        abort: &AbortFlag,
        report: &mut dyn FnMut(TileReport),
    ) -> Option<Vec<u32>> {
        let mapper = PlaneMapper::new(canvas, params.center(), params.radius());

        // A reused orbit may belong to a nearby center; the offset
        // between the two centers is computed exactly and only then
        // rounded.
        let orbit = match (params.mode, orbit) {
            (RenderMode::Perturbation, Some(orbit)) if orbit.xn.len() > 1 => {
                let offset = Complex::new(to_f64(&(&params.x - &orbit.x)), to_f64(&(&params.y - &orbit.y)));
                Some((orbit, offset))
            }
            _ => None,
        };

        let preview = Resolution::new(
            rect.width / self.preview_divisor,
            rect.height / self.preview_divisor,
        );
        if self.preview_divisor > 1 && preview.area() > 0 {
            let buffer = self.fill(rect, preview, &mapper, params, orbit, abort, &mut |_| ())?;
            report(TileReport::Preview(buffer, preview));
        }

        self.fill(
            rect,
            rect.full_resolution(),
            &mapper,
            params,
            orbit,
            abort,
            &mut |fraction| report(TileReport::Progress(fraction)),
        )
    }
}

/// This is our classic iterator function: the number of iterations it
/// took the point to escape, or the limit if it never did.
pub fn escape_time(c: Complex<f64>, limit: u32) -> u32 {
    let mut z: Complex<f64> = Complex { re: 0.0, im: 0.0 };
    for i in 0..limit {
        z = z * z + c;
        if z.norm_sqr() > ESCAPE_RADIUS_SQ {
            return i + 1;
        }
    }
    limit
}

// The escape time of the point `dc` away from the orbit's reference
// point, iterating only the difference between the two.  The orbit
// needs at least two points.
fn perturbed_escape_time(orbit: &RefOrbit, dc: Complex<f64>, limit: u32) -> u32 {
    let xn = &orbit.xn;
    let last = xn.len() - 1;
    let mut dz: Complex<f64> = Complex { re: 0.0, im: 0.0 };
    let mut m = 0;
    for i in 0..limit {
        let step = &orbit.bla[m];
        dz = if dz.norm() < step.radius {
            step.a * dz + dc
        } else {
            (xn[m] * 2.0 + dz) * dz + dc
        };
        m += 1;

        let z = xn[m] + dz;
        let z_norm = z.norm_sqr();
        if z_norm > ESCAPE_RADIUS_SQ {
            return i + 1;
        }
        if z_norm < dz.norm_sqr() || m == last {
            dz = z;
            m = 0;
        }
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(mode: RenderMode) -> ViewParams {
        ViewParams::parse("-0.5", "0", "1.5", 300, mode).unwrap()
    }

    #[test]
    fn escape_time_matches_hand_iteration() {
        assert_eq!(escape_time(Complex::new(0.0, 0.0), 100), 100);
        assert_eq!(escape_time(Complex::new(-1.0, 0.0), 100), 100);
        // 2 -> 6: out on the second step.
        assert_eq!(escape_time(Complex::new(2.0, 0.0), 100), 2);
        assert_eq!(escape_time(Complex::new(3.0, 0.0), 100), 1);
    }

    #[test]
    fn reference_orbit_starts_at_zero_and_stops_on_escape() {
        let params = ViewParams::parse("1", "0", "1", 100, RenderMode::Perturbation).unwrap();
        let orbit = EscapeTimeKernel::new()
            .reference_orbit(&params, &AbortFlag::new(), &mut |_| ())
            .unwrap();
        // 0, 1, 2, 5: escaped.
        assert_eq!(orbit.xn.len(), 4);
        assert_eq!(orbit.xn[0], Complex::new(0.0, 0.0));
        assert_eq!(orbit.xn[3], Complex::new(5.0, 0.0));
        assert_eq!(orbit.bla.len(), orbit.xn.len());
        assert_eq!(orbit.max_iterations, 100);
    }

    #[test]
    fn aborted_work_returns_nothing() {
        let abort = AbortFlag::new();
        abort.raise();
        let kernel = EscapeTimeKernel::new();
        assert!(kernel
            .reference_orbit(&view(RenderMode::Perturbation), &abort, &mut |_| ())
            .is_none());
        assert!(kernel
            .iterate_tile(
                Rect::new(0, 0, 8, 8),
                &view(RenderMode::Normal),
                Resolution::new(8, 8),
                None,
                &abort,
                &mut |_| ()
            )
            .is_none());
    }

    #[test]
    fn tiles_preview_then_report_progress_to_completion() {
        let kernel = EscapeTimeKernel::new();
        let mut reports = vec![];
        let buffer = kernel
            .iterate_tile(
                Rect::new(0, 0, 16, 8),
                &view(RenderMode::Normal),
                Resolution::new(16, 8),
                None,
                &AbortFlag::new(),
                &mut |r| reports.push(r),
            )
            .unwrap();
        assert_eq!(buffer.len(), 16 * 8);
        match reports[0] {
            TileReport::Preview(ref preview, resolution) => {
                assert_eq!(resolution, Resolution::new(4, 2));
                assert_eq!(preview.len(), 8);
            }
            ref other => panic!("expected a preview first, got {:?}", other),
        }
        assert_eq!(reports.last(), Some(&TileReport::Progress(1.0)));
    }

    #[test]
    fn perturbation_agrees_with_plain_iteration() {
        let kernel = EscapeTimeKernel::with_preview_divisor(1);
        let canvas = Resolution::new(48, 32);
        let rect = Rect::new(0, 0, 48, 32);
        let abort = AbortFlag::new();

        let plain = kernel
            .iterate_tile(rect, &view(RenderMode::Normal), canvas, None, &abort, &mut |_| ())
            .unwrap();
        let params = view(RenderMode::Perturbation);
        let orbit = kernel.reference_orbit(&params, &abort, &mut |_| ()).unwrap();
        let perturbed = kernel
            .iterate_tile(rect, &params, canvas, Some(&orbit), &abort, &mut |_| ())
            .unwrap();

        let disagreements = plain
            .iter()
            .zip(perturbed.iter())
            .filter(|(a, b)| a != b)
            .count();
        assert!(
            disagreements * 10 <= plain.len(),
            "{} of {} pixels disagree",
            disagreements,
            plain.len()
        );
    }

    #[test]
    fn perturbation_works_from_a_neighbouring_orbit() {
        let kernel = EscapeTimeKernel::with_preview_divisor(1);
        let canvas = Resolution::new(32, 32);
        let rect = Rect::new(0, 0, 32, 32);
        let abort = AbortFlag::new();

        let here = view(RenderMode::Perturbation);
        let nearby = ViewParams::parse("-0.4", "0.1", "1.5", 300, RenderMode::Perturbation).unwrap();
        let orbit = kernel.reference_orbit(&nearby, &abort, &mut |_| ()).unwrap();

        let plain = kernel
            .iterate_tile(rect, &view(RenderMode::Normal), canvas, None, &abort, &mut |_| ())
            .unwrap();
        let perturbed = kernel
            .iterate_tile(rect, &here, canvas, Some(&orbit), &abort, &mut |_| ())
            .unwrap();
        let disagreements = plain
            .iter()
            .zip(perturbed.iter())
            .filter(|(a, b)| a != b)
            .count();
        assert!(disagreements * 10 <= plain.len());
    }
}
