//! Geohash Encoding and Great-Circle Distance
//!
//! Coordinates are stored as sorted-set scores. Each axis is quantized into
//! one of 2^26 cells and the two 26-bit cell indices are interleaved into a
//! single 52-bit integer, which an `f64` represents exactly.
//!
//! ```text
//!  bit:  51  50  49  48 ...  3   2   1   0
//!        lon lat lon lat ... lon lat lon lat
//! ```
//!
//! Decoding returns the centre of the cell, so a round trip is accurate to
//! half a cell on each axis, never exact.

/// Latitude limits of the Web Mercator projection.
pub const LAT_MIN: f64 = -85.05112878;
pub const LAT_MAX: f64 = 85.05112878;
pub const LON_MIN: f64 = -180.0;
pub const LON_MAX: f64 = 180.0;

/// Bits of precision per axis.
pub const STEP: u32 = 26;

/// Earth radius in meters used for haversine distances.
pub const EARTH_RADIUS_M: f64 = 6372797.560856;

const CELLS: f64 = (1u64 << STEP) as f64;

/// A decoded coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

/// Returns true when the pair lies inside the indexable domain.
pub fn is_valid(longitude: f64, latitude: f64) -> bool {
    (LON_MIN..=LON_MAX).contains(&longitude) && (LAT_MIN..=LAT_MAX).contains(&latitude)
}

/// Inserts a zero bit between each of the low 32 bits of `v`.
#[inline]
pub fn spread(v: u32) -> u64 {
    let mut x = v as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Inverse of [`spread`]: keeps every even bit and packs them together.
#[inline]
pub fn compact(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x >> 4)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x >> 8)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x >> 16)) & 0x0000_0000_FFFF_FFFF;
    x as u32
}

fn quantize(value: f64, min: f64, max: f64) -> u32 {
    let cell = ((value - min) / (max - min) * CELLS) as u64;
    cell.min((1u64 << STEP) - 1) as u32
}

/// Encodes a coordinate pair into its 52-bit geohash.
///
/// The caller is expected to have checked [`is_valid`].
pub fn encode(longitude: f64, latitude: f64) -> u64 {
    let lat = quantize(latitude, LAT_MIN, LAT_MAX);
    let lon = quantize(longitude, LON_MIN, LON_MAX);
    spread(lat) | (spread(lon) << 1)
}

/// Decodes a geohash to the centre of its cell.
pub fn decode(hash: u64) -> Coordinates {
    let lat = compact(hash) as f64;
    let lon = compact(hash >> 1) as f64;

    let lat_lo = LAT_MIN + (lat / CELLS) * (LAT_MAX - LAT_MIN);
    let lat_hi = LAT_MIN + ((lat + 1.0) / CELLS) * (LAT_MAX - LAT_MIN);
    let lon_lo = LON_MIN + (lon / CELLS) * (LON_MAX - LON_MIN);
    let lon_hi = LON_MIN + ((lon + 1.0) / CELLS) * (LON_MAX - LON_MIN);

    Coordinates {
        longitude: ((lon_lo + lon_hi) / 2.0).clamp(LON_MIN, LON_MAX),
        latitude: ((lat_lo + lat_hi) / 2.0).clamp(LAT_MIN, LAT_MAX),
    }
}

/// Decodes a sorted-set score. Scores outside the 52-bit range are rejected.
pub fn decode_score(score: f64) -> Option<Coordinates> {
    if !(0.0..(1u64 << (2 * STEP)) as f64).contains(&score) {
        return None;
    }
    Some(decode(score as u64))
}

/// Haversine distance in meters.
pub fn distance(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((b.longitude.to_radians() - a.longitude.to_radians()) / 2.0).sin();
    2.0 * EARTH_RADIUS_M * (u * u + lat1.cos() * lat2.cos() * v * v).sqrt().asin()
}

/// Meters per unit. Unknown units are treated as meters.
pub fn unit_factor(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "km" => 1000.0,
        "mi" => 1609.344,
        "ft" => 0.3048,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LON_CELL: f64 = (LON_MAX - LON_MIN) / CELLS;
    const LAT_CELL: f64 = (LAT_MAX - LAT_MIN) / CELLS;

    #[test]
    fn test_spread_examples() {
        assert_eq!(spread(0), 0);
        assert_eq!(spread(1), 1);
        assert_eq!(spread(0b11), 0b101);
        assert_eq!(spread(0x3FF_FFFF), 0x5_5555_5555_5555);
    }

    #[test]
    fn test_known_score() {
        // Palermo
        let hash = encode(13.361389, 38.115556);
        assert_eq!(hash, 3479099956230698);
    }

    #[test]
    fn test_distance_palermo_catania() {
        let palermo = decode(encode(13.361389, 38.115556));
        let catania = decode(encode(15.087269, 37.502669));
        let d = distance(palermo, catania);
        assert!((d - 166274.1516).abs() < 1.0, "distance was {}", d);
    }

    #[test]
    fn test_distance_identical_points_is_zero() {
        let p = decode(encode(2.2945, 48.8584));
        assert_eq!(distance(p, p), 0.0);
    }

    #[test]
    fn test_bounds() {
        assert!(is_valid(180.0, 85.05112878));
        assert!(is_valid(-180.0, -85.05112878));
        assert!(!is_valid(180.1, 0.0));
        assert!(!is_valid(0.0, 85.06));

        // The corners still encode to 52 bits.
        assert!(encode(LON_MAX, LAT_MAX) < 1u64 << 52);
    }

    #[test]
    fn test_units() {
        assert_eq!(unit_factor("m"), 1.0);
        assert_eq!(unit_factor("KM"), 1000.0);
        assert_eq!(unit_factor("mi"), 1609.344);
        assert_eq!(unit_factor("ft"), 0.3048);
        assert_eq!(unit_factor("furlong"), 1.0);
    }

    #[test]
    fn test_decode_score_rejects_out_of_range() {
        assert!(decode_score(-1.0).is_none());
        assert!(decode_score((1u64 << 52) as f64).is_none());
        assert!(decode_score(0.0).is_some());
    }

    proptest! {
        #[test]
        fn prop_compact_inverts_spread(v in 0u32..(1 << 26)) {
            prop_assert_eq!(compact(spread(v)), v);
        }

        #[test]
        fn prop_spread_leaves_odd_bits_clear(v in 0u32..(1 << 26)) {
            prop_assert_eq!(spread(v) & 0xAAAA_AAAA_AAAA_AAAA, 0);
        }

        #[test]
        fn prop_round_trip_within_one_cell(
            lon in LON_MIN..=LON_MAX,
            lat in LAT_MIN..=LAT_MAX,
        ) {
            let decoded = decode(encode(lon, lat));
            prop_assert!((decoded.longitude - lon).abs() <= LON_CELL);
            prop_assert!((decoded.latitude - lat).abs() <= LAT_CELL);
        }
    }
}
