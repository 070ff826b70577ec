//! HEALPix (Hierarchical Equal Area isoLatitude Pixelisation) geometry, RING scheme.
//!
//! Only the pixel → direction half of the scheme is needed here: the coadder works with pixel
//! indices produced upstream, and the mask builder needs the colatitude of every pixel.
//!
//! Rings are counted from the north pole:
//! - north polar cap: the first `2·nside·(nside − 1)` pixels,
//! - equatorial belt: `4·nside` pixels per ring over `2·nside + 1` rings,
//! - south polar cap: mirror image of the north cap.

use std::f64::consts::{FRAC_PI_2, PI};

use crate::constants::{Nside, PixelIndex, Radian};

/// Full-sky RING pixelization at a fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixelization {
    nside: Nside,
}

impl Pixelization {
    pub fn new(nside: Nside) -> Self {
        Pixelization { nside }
    }

    pub fn nside(&self) -> Nside {
        self.nside
    }

    /// Total number of pixels: 12 · nside².
    pub fn npix(&self) -> usize {
        let ns = self.nside as usize;
        12 * ns * ns
    }

    /// Number of pixels in the north polar cap.
    fn ncap(&self) -> usize {
        let ns = self.nside as usize;
        2 * ns * (ns.saturating_sub(1))
    }

    /// Solid angle (steradians) of a single pixel.
    pub fn pixel_area(&self) -> f64 {
        4.0 * PI / self.npix() as f64
    }

    /// Convert a RING pixel index to `(z, phi)` of its center, with `z = cos(theta)`.
    ///
    /// Arguments
    /// -----------------
    /// * `pix`: pixel index, must be `< npix()`.
    ///
    /// Return
    /// ----------
    /// * `(z, phi)` with `z ∈ [-1, 1]` and `phi ∈ [0, 2π)`.
    pub fn pix2z_phi(&self, pix: PixelIndex) -> (f64, Radian) {
        let ns = self.nside as usize;
        let npix = self.npix();
        let ncap = self.ncap();
        let fact2 = 4.0 / npix as f64;

        if pix < ncap {
            let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
            let iphi = (pix + 1) - 2 * iring * (iring - 1);
            let z = 1.0 - (iring * iring) as f64 * fact2;
            let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
            (z, phi)
        } else if pix < npix - ncap {
            let fact1 = (2 * ns) as f64 * fact2;
            let ip = pix - ncap;
            let iring = ip / (4 * ns) + ns;
            let iphi = ip % (4 * ns) + 1;
            // 1 if iring + nside is odd, 1/2 otherwise
            let fodd = if (iring + ns) & 1 == 1 { 1.0 } else { 0.5 };
            let nl2 = 2 * ns;
            let z = (nl2 as f64 - iring as f64) * fact1;
            let phi = (iphi as f64 - fodd) * PI / nl2 as f64;
            (z, phi)
        } else {
            let ip = npix - pix;
            let iring = (1 + isqrt(2 * ip - 1)) >> 1;
            let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
            let z = -1.0 + (iring * iring) as f64 * fact2;
            let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
            (z, phi)
        }
    }

    /// Convert a RING pixel index to the `(theta, phi)` of its center.
    ///
    /// `theta` is the colatitude in `[0, π]`, `phi` the longitude in `[0, 2π)`.
    pub fn pix2ang(&self, pix: PixelIndex) -> (Radian, Radian) {
        let (z, phi) = self.pix2z_phi(pix);
        (z.clamp(-1.0, 1.0).acos(), phi)
    }

    /// Colatitude of every pixel center, in pixel order.
    pub fn colatitudes(&self) -> Vec<Radian> {
        (0..self.npix()).map(|p| self.pix2ang(p).0).collect()
    }
}

/// Integer square root, exact for every `usize` reachable from a 29-bit nside.
fn isqrt(v: usize) -> usize {
    let mut r = (v as f64).sqrt() as usize;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}
