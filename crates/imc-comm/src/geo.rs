// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WGS-84 helpers for turning local NED offsets into absolute positions.

const WGS84_A: f64 = 6_378_137.0;
const WGS84_E2: f64 = 0.006_694_379_990_14;

/// Displace a geodetic position (degrees, metres) by north/east/down metres.
///
/// Uses the local meridian and prime-vertical radii of curvature, which is
/// accurate to well under a metre for the kilometre-scale offsets vehicles
/// report.
pub fn displace(lat_deg: f64, lon_deg: f64, north: f64, east: f64) -> (f64, f64) {
    if north == 0.0 && east == 0.0 {
        return (lat_deg, lon_deg);
    }
    let lat = lat_deg.to_radians();
    let sin_lat = lat.sin();
    let w = (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let meridian = WGS84_A * (1.0 - WGS84_E2) / (w * w * w);
    let prime_vertical = WGS84_A / w;

    let dlat = north / meridian;
    let cos_lat = lat.cos();
    let dlon = if cos_lat.abs() < 1e-12 {
        0.0
    } else {
        east / (prime_vertical * cos_lat)
    };

    (lat_deg + dlat.to_degrees(), normalize_deg_180(lon_deg + dlon.to_degrees()))
}

/// Normalize an angle to [-180, 180).
pub fn normalize_deg_180(deg: f64) -> f64 {
    let mut a = (deg + 180.0) % 360.0;
    if a < 0.0 {
        a += 360.0;
    }
    a - 180.0
}

/// Normalize an angle to [0, 360).
pub fn normalize_deg_360(deg: f64) -> f64 {
    let a = deg % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}
