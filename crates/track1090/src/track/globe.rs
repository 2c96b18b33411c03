/// Globe tile indexing: positions map onto a 3-degree grid, except for a
/// set of special tiles covering oceanic and low-traffic regions that are
/// merged into single indices below 1000.

pub const GLOBE_INDEX_GRID: i32 = 3;
pub const GLOBE_LAT_MULT: i32 = 360 / GLOBE_INDEX_GRID + 1;
pub const GLOBE_MIN_INDEX: i32 = 1000;
pub const GLOBE_MAX_INDEX: i32 = 180 / GLOBE_INDEX_GRID * GLOBE_LAT_MULT + GLOBE_MIN_INDEX;

/// south, west, north, east
#[derive(Debug, Clone, Copy)]
pub struct Tile {
    pub south: i32,
    pub west: i32,
    pub north: i32,
    pub east: i32,
}

const fn tile(south: i32, west: i32, north: i32, east: i32) -> Tile {
    Tile {
        south,
        west,
        north,
        east,
    }
}

/// Merged regions, mostly oceans and sparse land masses
pub static SPECIAL_TILES: &[Tile] = &[
    // Arctic
    tile(60, -126, 90, 0),
    tile(60, 0, 90, 150),
    // Alaska and Chukotka
    tile(51, 150, 90, -126),
    // North Pacific
    tile(9, 150, 51, -126),
    // Northern Canada
    tile(51, -126, 60, -69),
    // Northwest USA
    tile(45, -120, 51, -114),
    tile(45, -114, 51, -102),
    tile(45, -102, 51, -90),
    // Eastern Canada
    tile(45, -90, 51, -75),
    tile(45, -75, 51, -69),
    // Balkan
    tile(42, 12, 48, 18),
    tile(42, 18, 48, 24),
    // Poland
    tile(48, 18, 54, 24),
    // Sweden
    tile(54, 12, 60, 24),
    // Denmark
    tile(54, 3, 60, 12),
    // Northern UK
    tile(54, -9, 60, 3),
    // Bay of Biscay
    tile(42, -9, 48, 0),
    // West Russia
    tile(42, 24, 51, 51),
    tile(51, 24, 60, 51),
    // Central Russia
    tile(30, 51, 60, 90),
    // East Russia
    tile(30, 90, 60, 120),
    // Koreas and Japan and some Russia
    tile(30, 120, 39, 129),
    tile(30, 129, 39, 138),
    tile(30, 138, 39, 150),
    tile(39, 120, 60, 150),
    // Vietnam
    tile(9, 90, 21, 111),
    // South China
    tile(21, 90, 30, 111),
    // South China and ICAO special use
    tile(9, 111, 24, 129),
    tile(24, 111, 30, 120),
    tile(24, 120, 30, 129),
    // mostly Pacific south of Japan
    tile(9, 129, 30, 150),
    // Persian Gulf / Arabian Sea
    tile(9, 51, 30, 69),
    // India
    tile(9, 69, 30, 90),
    // South Atlantic / South Africa
    tile(-90, -30, 9, 51),
    // Indian Ocean
    tile(-90, 51, 9, 111),
    // Australia
    tile(-90, 111, -18, 160),
    tile(-18, 111, 9, 160),
    // South Pacific and NZ
    tile(-90, 160, -42, -90),
    tile(-42, 160, 9, -90),
    // North South America
    tile(-9, -90, 9, -42),
    // South South America
    tile(-90, -90, -9, -63),
    tile(-21, -63, -9, -42),
    tile(-90, -63, -21, -42),
    tile(-90, -42, 9, -30),
    // Guatemala / Mexico
    tile(9, -126, 33, -117),
    tile(9, -117, 30, -102),
    // western gulf + east Mexico
    tile(9, -102, 27, -90),
    // eastern Gulf of Mexico
    tile(24, -90, 30, -84),
    // south of Jamaica
    tile(9, -90, 18, -69),
    // Cuba / Haiti
    tile(18, -90, 24, -69),
    // Mediterranean
    tile(36, 6, 42, 18),
    tile(36, 18, 42, 30),
];

/// Index of the tile containing a position. Special tiles win; everything
/// else gets a regular grid index at or above GLOBE_MIN_INDEX.
pub fn globe_index(lat_in: f64, lon_in: f64) -> i32 {
    let grid = GLOBE_INDEX_GRID;
    let lat = grid * ((lat_in + 90.0) / grid as f64) as i32 - 90;
    let lon = grid * ((lon_in + 180.0) / grid as f64) as i32 - 180;

    for (i, tile) in SPECIAL_TILES.iter().enumerate() {
        if lat >= tile.south && lat < tile.north {
            if tile.west < tile.east && lon >= tile.west && lon < tile.east {
                return i as i32;
            }
            // tiles crossing the antimeridian
            if tile.west > tile.east && (lon >= tile.west || lon < tile.east) {
                return i as i32;
            }
        }
    }

    let i = (lat + 90) / grid;
    let j = (lon + 180) / grid;

    let res = i * GLOBE_LAT_MULT + j + GLOBE_MIN_INDEX;
    if res > GLOBE_MAX_INDEX {
        return GLOBE_MIN_INDEX;
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_tile() {
        // central Poland merges into the Poland special tile
        let poland = globe_index(52.2, 21.0);
        assert!(poland < GLOBE_MIN_INDEX);
        let tile = &SPECIAL_TILES[poland as usize];
        assert!(tile.south <= 52 && tile.north > 52);
        assert!(tile.west <= 21 && tile.east > 21);
    }

    #[test]
    fn test_regular_grid() {
        let idx = globe_index(40.0, -8.0);
        assert!(idx >= GLOBE_MIN_INDEX);
        assert!(idx <= GLOBE_MAX_INDEX);

        // nearby positions in the same 3 degree cell share an index
        assert_eq!(idx, globe_index(40.9, -8.9));
        // a different cell gets a different index
        assert_ne!(idx, globe_index(40.0, -14.0));
    }

    #[test]
    fn test_bounds() {
        for &(lat, lon) in &[(89.9, 179.9), (-89.9, -179.9), (0.0, 0.0), (-0.1, 0.1)] {
            let idx = globe_index(lat, lon);
            assert!((0..=GLOBE_MAX_INDEX).contains(&idx), "{lat},{lon} -> {idx}");
        }
    }
}
