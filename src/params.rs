//! View parameters: where on the complex plane we are looking, how
//! far in, and how hard we try before calling a point "inside."
//!
//! The center and radius are kept as exact rationals.  A deep zoom
//! lives at radii far below what an `f64` can tell apart from its
//! neighbours, and the reference-orbit cache asks questions like "is
//! this the *same* center?", which only have a sensible answer if the
//! numbers are exact.  The kernels get `f64` projections of them.

use num::bigint::BigInt;
use num::{BigRational, Complex, ToPrimitive, Zero};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// How the tile workers compute iteration counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Straight escape-time iteration in `f64`.
    Normal,
    /// Iterate pixel deltas against one high-precision reference orbit.
    Perturbation,
}

const MODES: [RenderMode; 2] = [RenderMode::Normal, RenderMode::Perturbation];

impl RenderMode {
    /// Only perturbation rendering needs a reference orbit.
    pub fn uses_perturbation(self) -> bool {
        self == RenderMode::Perturbation
    }

    /// The mode after this one, wrapping around.  Lets a user flip
    /// through the modes with a single key.
    pub fn next(self) -> RenderMode {
        let idx = MODES.iter().position(|&m| m == self).unwrap_or(0);
        MODES[(idx + 1) % MODES.len()]
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RenderMode::Normal => write!(f, "normal"),
            RenderMode::Perturbation => write!(f, "perturbation"),
        }
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "normal" => Ok(RenderMode::Normal),
            "perturbation" => Ok(RenderMode::Perturbation),
            _ => Err(format!("unknown render mode: {}", s)),
        }
    }
}

/// One viewport snapshot: center `(x, y)`, radius `r` (half the
/// shorter side of the screen), the iteration limit `N`, and the
/// render mode.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewParams {
    /// Real part of the center.
    pub x: BigRational,
    /// Imaginary part of the center.
    pub y: BigRational,
    /// Radius of the view.
    pub r: BigRational,
    /// Iteration limit.
    pub max_iterations: u32,
    /// Which kernel to use.
    pub mode: RenderMode,
}

impl ViewParams {
    /// Builds a view, refusing a non-positive radius.
    pub fn new(
        x: BigRational,
        y: BigRational,
        r: BigRational,
        max_iterations: u32,
        mode: RenderMode,
    ) -> Result<Self> {
        if r <= BigRational::zero() {
            return Err(Error::Radius);
        }
        Ok(ViewParams {
            x,
            y,
            r,
            max_iterations,
            mode,
        })
    }

    /// Builds a view out of decimal strings, exactly.
    pub fn parse(x: &str, y: &str, r: &str, max_iterations: u32, mode: RenderMode) -> Result<Self> {
        ViewParams::new(
            parse_decimal(x)?,
            parse_decimal(y)?,
            parse_decimal(r)?,
            max_iterations,
            mode,
        )
    }

    /// The center, rounded to the nearest `f64`s.
    pub fn center(&self) -> Complex<f64> {
        Complex::new(to_f64(&self.x), to_f64(&self.y))
    }

    /// The radius, rounded to the nearest `f64`.
    pub fn radius(&self) -> f64 {
        to_f64(&self.r)
    }
}

/// Rounds a rational to an `f64`.  Good down to roughly 1e-300,
/// which is deeper than the bundled kernels can make use of anyway.
pub fn to_f64(q: &BigRational) -> f64 {
    match (q.numer().to_f64(), q.denom().to_f64()) {
        (Some(n), Some(d)) => n / d,
        _ => std::f64::NAN,
    }
}

/// Parses a plain decimal number, with an optional exponent, into an
/// exact rational: `"-0.743643887037151"`, `"1.5"`, `"2e-14"`.
pub fn parse_decimal(s: &str) -> Result<BigRational> {
    let err = || Error::Coordinate(s.to_string());
    let text = s.trim();

    let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
        Some(idx) => (
            &text[..idx],
            text[idx + 1..].parse::<i32>().map_err(|_| err())?,
        ),
        None => (text, 0),
    };

    let (negative, mantissa) = if mantissa.starts_with('-') {
        (true, &mantissa[1..])
    } else if mantissa.starts_with('+') {
        (false, &mantissa[1..])
    } else {
        (false, mantissa)
    };

    let (whole, fraction) = match mantissa.find('.') {
        Some(idx) => (&mantissa[..idx], &mantissa[idx + 1..]),
        None => (mantissa, ""),
    };

    let digits = format!("{}{}", whole, fraction);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }

    let mut numer = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(err)?;
    if negative {
        numer = -numer;
    }

    let scale = i64::from(exponent) - fraction.len() as i64;
    let ten = BigInt::from(10);
    let power = num::pow(ten, scale.abs() as usize);
    Ok(if scale >= 0 {
        BigRational::from_integer(numer * power)
    } else {
        BigRational::new(numer, power)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn parses_plain_decimals_exactly() {
        assert_eq!(parse_decimal("1.5").unwrap(), q(3, 2));
        assert_eq!(parse_decimal("-0.75").unwrap(), q(-3, 4));
        assert_eq!(parse_decimal("0.1").unwrap(), q(1, 10));
        assert_eq!(parse_decimal("42").unwrap(), q(42, 1));
        assert_eq!(parse_decimal(".5").unwrap(), q(1, 2));
    }

    #[test]
    fn parses_exponents() {
        assert_eq!(parse_decimal("2e-3").unwrap(), q(2, 1000));
        assert_eq!(parse_decimal("1.25E2").unwrap(), q(125, 1));
        assert_eq!(parse_decimal("-1e0").unwrap(), q(-1, 1));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_decimal("").is_err());
        assert!(parse_decimal("-").is_err());
        assert!(parse_decimal("1.2.3").is_err());
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("1e").is_err());
    }

    #[test]
    fn view_rejects_non_positive_radius() {
        assert!(ViewParams::parse("0", "0", "0", 100, RenderMode::Normal).is_err());
        assert!(ViewParams::parse("0", "0", "-1", 100, RenderMode::Normal).is_err());
        assert!(ViewParams::parse("0", "0", "1", 100, RenderMode::Normal).is_ok());
    }

    #[test]
    fn view_projects_to_f64() {
        let view = ViewParams::parse("-0.75", "0.25", "1.5", 100, RenderMode::Normal).unwrap();
        assert_eq!(view.center(), Complex::new(-0.75, 0.25));
        assert_eq!(view.radius(), 1.5);
    }

    #[test]
    fn modes_cycle() {
        assert_eq!(RenderMode::Normal.next(), RenderMode::Perturbation);
        assert_eq!(RenderMode::Perturbation.next(), RenderMode::Normal);
        assert_eq!("perturbation".parse::<RenderMode>(), Ok(RenderMode::Perturbation));
        assert!("doublejs".parse::<RenderMode>().is_err());
    }
}
