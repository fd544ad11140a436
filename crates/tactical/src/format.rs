// format.rs - Binary .tmap files
//
// Layout (little endian):
//   "TMAP" u16 major u16 minor
//   "PRE " u32 size  record sizes, metadata size, grid, counts
//   "LEVL" u32 size  level records (48 bytes each)
//   "TILE" u32 size  tile records (8 bytes each), row-major
//   "LDAT" u32 size  level data (20-byte header + payload each)
//
// The preamble carries the record sizes so files written by a build with a
// different layout are rejected instead of misread. A file is either loaded
// whole or not at all.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use tracing::{debug, error};

use crate::map::{LEVEL_RECORD_SIZE, MapError, MapGrid, TILE_RECORD_SIZE, TacticalMap, Tile, TileLevel};
use crate::math::Plane;
use crate::metadata::{LEVEL_DATA_HEADER_SIZE, LevelData, LevelDataHeader, MAX_METADATA_SIZE};

pub const TMAP_MAGIC: &[u8; 4] = b"TMAP";
pub const FORMAT_MAJOR_VERSION: u16 = 1;
pub const FORMAT_MINOR_VERSION: u16 = 0;

const CHUNK_PREAMBLE: &[u8; 4] = b"PRE ";
const CHUNK_LEVELS: &[u8; 4] = b"LEVL";
const CHUNK_TILES: &[u8; 4] = b"TILE";
const CHUNK_LEVEL_DATA: &[u8; 4] = b"LDAT";

/// Nine u32 fields and six f32 fields.
const PREAMBLE_SIZE: u32 = 9 * 4 + 6 * 4;

/// Records reserved up front on load; counts come from the file, so larger
/// arrays grow as they are read.
const PREALLOC_RECORDS: usize = 1 << 16;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a tactical map file (magic {0:?})")]
    BadMagic([u8; 4]),
    #[error("unsupported format version {major}.{minor} (expected {FORMAT_MAJOR_VERSION}.x)")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("chunk mismatch: expected {expected:?}, got {found:?}")]
    ChunkMismatch { expected: String, found: String },
    #[error("chunk {chunk} is {found} bytes, expected {expected}")]
    ChunkSize { chunk: String, expected: u64, found: u32 },
    #[error("{record} record size {found} does not match {expected}")]
    RecordSize {
        record: &'static str,
        expected: u32,
        found: u32,
    },
    #[error("metadata size {size} exceeds the {max} byte limit")]
    MetadataTooLarge { size: u32, max: u32 },
    #[error("map too large to serialize")]
    TooLarge,
    #[error(transparent)]
    Map(#[from] MapError),
}

fn label(bytes: &[u8; 4]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// Writing
// ============================================================================

fn write_chunk_header<W: Write>(writer: &mut W, chunk: &[u8; 4], size: u64) -> Result<(), FormatError> {
    let size = u32::try_from(size).map_err(|_| FormatError::TooLarge)?;
    writer.write_all(chunk)?;
    writer.write_u32::<LittleEndian>(size)?;
    Ok(())
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> std::io::Result<()> {
    writer.write_f32::<LittleEndian>(v.x)?;
    writer.write_f32::<LittleEndian>(v.y)?;
    writer.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

fn write_plane<W: Write>(writer: &mut W, plane: &Plane) -> std::io::Result<()> {
    for value in plane.to_array() {
        writer.write_f32::<LittleEndian>(value)?;
    }
    Ok(())
}

/// Serialize `map`.
pub fn save<W: Write>(map: &TacticalMap, writer: &mut W) -> Result<(), FormatError> {
    let grid = map.grid();
    let metadata_size = map.metadata_size();
    let count = |n: usize| u32::try_from(n).map_err(|_| FormatError::TooLarge);

    writer.write_all(TMAP_MAGIC)?;
    writer.write_u16::<LittleEndian>(FORMAT_MAJOR_VERSION)?;
    writer.write_u16::<LittleEndian>(FORMAT_MINOR_VERSION)?;

    write_chunk_header(writer, CHUNK_PREAMBLE, PREAMBLE_SIZE as u64)?;
    writer.write_u32::<LittleEndian>(TILE_RECORD_SIZE as u32)?;
    writer.write_u32::<LittleEndian>(LEVEL_RECORD_SIZE as u32)?;
    writer.write_u32::<LittleEndian>(LEVEL_DATA_HEADER_SIZE as u32)?;
    writer.write_u32::<LittleEndian>(metadata_size)?;
    writer.write_u32::<LittleEndian>(grid.width)?;
    writer.write_u32::<LittleEndian>(grid.height)?;
    writer.write_u32::<LittleEndian>(count(map.tiles().len())?)?;
    writer.write_u32::<LittleEndian>(count(map.levels().len())?)?;
    writer.write_u32::<LittleEndian>(count(map.level_data().len())?)?;
    write_vec3(writer, grid.origin)?;
    writer.write_f32::<LittleEndian>(grid.tile_size)?;
    writer.write_f32::<LittleEndian>(grid.min_height)?;
    writer.write_f32::<LittleEndian>(grid.max_height)?;

    write_chunk_header(writer, CHUNK_LEVELS, (map.levels().len() * LEVEL_RECORD_SIZE) as u64)?;
    for level in map.levels() {
        write_plane(writer, &level.floor)?;
        write_plane(writer, &level.ceiling)?;
        writer.write_f32::<LittleEndian>(level.base_height)?;
        writer.write_f32::<LittleEndian>(level.roof_delta)?;
        writer.write_u32::<LittleEndian>(level.data_index)?;
        writer.write_u32::<LittleEndian>(level.reserved)?;
    }

    write_chunk_header(writer, CHUNK_TILES, (map.tiles().len() * TILE_RECORD_SIZE) as u64)?;
    for tile in map.tiles() {
        writer.write_u32::<LittleEndian>(tile.level_count)?;
        writer.write_u32::<LittleEndian>(tile.level_start)?;
    }

    let data_stride = LEVEL_DATA_HEADER_SIZE + metadata_size as usize;
    write_chunk_header(writer, CHUNK_LEVEL_DATA, (map.level_data().len() * data_stride) as u64)?;
    let padding = vec![0u8; metadata_size as usize];
    for data in map.level_data() {
        data.header.write_to(writer)?;
        let payload_len = data.payload.len().min(metadata_size as usize);
        writer.write_all(&data.payload[..payload_len])?;
        writer.write_all(&padding[payload_len..])?;
    }

    Ok(())
}

pub fn save_to_file(map: &TacticalMap, path: &Path) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(File::create(path)?);
    save(map, &mut writer)?;
    writer.flush()?;
    debug!("Wrote tactical map {}", path.display());
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

fn read_chunk_header<R: Read>(reader: &mut R, expected: &[u8; 4], expected_size: u64) -> Result<(), FormatError> {
    let mut chunk = [0u8; 4];
    reader.read_exact(&mut chunk)?;
    if &chunk != expected {
        return Err(FormatError::ChunkMismatch {
            expected: label(expected),
            found: label(&chunk),
        });
    }
    let size = reader.read_u32::<LittleEndian>()?;
    if size as u64 != expected_size {
        return Err(FormatError::ChunkSize {
            chunk: label(expected),
            expected: expected_size,
            found: size,
        });
    }
    Ok(())
}

fn read_vec3<R: Read>(reader: &mut R) -> std::io::Result<Vec3> {
    let x = reader.read_f32::<LittleEndian>()?;
    let y = reader.read_f32::<LittleEndian>()?;
    let z = reader.read_f32::<LittleEndian>()?;
    Ok(Vec3::new(x, y, z))
}

fn read_plane<R: Read>(reader: &mut R) -> std::io::Result<Plane> {
    let mut values = [0.0f32; 4];
    reader.read_f32_into::<LittleEndian>(&mut values)?;
    Ok(Plane::from_array(values))
}

fn check_record_size(record: &'static str, expected: usize, found: u32) -> Result<(), FormatError> {
    if found as usize != expected {
        return Err(FormatError::RecordSize {
            record,
            expected: expected as u32,
            found,
        });
    }
    Ok(())
}

fn read_map<R: Read>(reader: &mut R) -> Result<TacticalMap, FormatError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != TMAP_MAGIC {
        return Err(FormatError::BadMagic(magic));
    }
    let major = reader.read_u16::<LittleEndian>()?;
    let minor = reader.read_u16::<LittleEndian>()?;
    if major != FORMAT_MAJOR_VERSION {
        return Err(FormatError::UnsupportedVersion { major, minor });
    }

    read_chunk_header(reader, CHUNK_PREAMBLE, PREAMBLE_SIZE as u64)?;
    check_record_size("tile", TILE_RECORD_SIZE, reader.read_u32::<LittleEndian>()?)?;
    check_record_size("level", LEVEL_RECORD_SIZE, reader.read_u32::<LittleEndian>()?)?;
    check_record_size("level data header", LEVEL_DATA_HEADER_SIZE, reader.read_u32::<LittleEndian>()?)?;
    let metadata_size = reader.read_u32::<LittleEndian>()?;
    if metadata_size > MAX_METADATA_SIZE {
        return Err(FormatError::MetadataTooLarge {
            size: metadata_size,
            max: MAX_METADATA_SIZE,
        });
    }
    let width = reader.read_u32::<LittleEndian>()?;
    let height = reader.read_u32::<LittleEndian>()?;
    let tile_count = reader.read_u32::<LittleEndian>()? as usize;
    let level_count = reader.read_u32::<LittleEndian>()? as usize;
    let data_count = reader.read_u32::<LittleEndian>()? as usize;
    let origin = read_vec3(reader)?;
    let tile_size = reader.read_f32::<LittleEndian>()?;
    let min_height = reader.read_f32::<LittleEndian>()?;
    let max_height = reader.read_f32::<LittleEndian>()?;

    let grid = MapGrid {
        width,
        height,
        tile_size,
        origin,
        min_height,
        max_height,
    };
    if tile_count != grid.tile_count() {
        return Err(MapError::TileCountMismatch {
            expected: grid.tile_count(),
            actual: tile_count,
        }
        .into());
    }

    read_chunk_header(reader, CHUNK_LEVELS, (level_count * LEVEL_RECORD_SIZE) as u64)?;
    let mut levels = Vec::with_capacity(level_count.min(PREALLOC_RECORDS));
    for _ in 0..level_count {
        levels.push(TileLevel {
            floor: read_plane(reader)?,
            ceiling: read_plane(reader)?,
            base_height: reader.read_f32::<LittleEndian>()?,
            roof_delta: reader.read_f32::<LittleEndian>()?,
            data_index: reader.read_u32::<LittleEndian>()?,
            reserved: reader.read_u32::<LittleEndian>()?,
        });
    }

    read_chunk_header(reader, CHUNK_TILES, (tile_count * TILE_RECORD_SIZE) as u64)?;
    let mut tiles = Vec::with_capacity(tile_count.min(PREALLOC_RECORDS));
    for _ in 0..tile_count {
        tiles.push(Tile {
            level_count: reader.read_u32::<LittleEndian>()?,
            level_start: reader.read_u32::<LittleEndian>()?,
        });
    }

    let data_stride = LEVEL_DATA_HEADER_SIZE + metadata_size as usize;
    read_chunk_header(reader, CHUNK_LEVEL_DATA, (data_count * data_stride) as u64)?;
    let mut level_data = Vec::with_capacity(data_count.min(PREALLOC_RECORDS));
    for _ in 0..data_count {
        let header = LevelDataHeader::read_from(reader)?;
        let mut payload = vec![0u8; metadata_size as usize];
        reader.read_exact(&mut payload)?;
        level_data.push(LevelData::new(header, payload));
    }

    Ok(TacticalMap::from_parts(grid, metadata_size, tiles, levels, level_data)?)
}

/// Deserialize a map. On any error nothing is returned.
pub fn load<R: Read>(reader: &mut R) -> Result<TacticalMap, FormatError> {
    read_map(reader).inspect_err(|err| error!("Rejected tactical map: {}", err))
}

pub fn load_from_file(path: &Path) -> Result<TacticalMap, FormatError> {
    let mut reader = BufReader::new(File::open(path)?);
    let map = load(&mut reader)?;
    debug!(
        "Loaded tactical map {}: {}x{} tiles, {} levels",
        path.display(),
        map.width(),
        map.height(),
        map.levels().len()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use glam::Affine3A;

    use super::*;
    use crate::builder::TacticalMapBuilder;
    use crate::executor::Executor;
    use crate::map::tests::uniform_map;
    use crate::math::Aabb;
    use crate::metadata::StructuralType;

    fn built_map() -> TacticalMap {
        let mut builder = TacticalMapBuilder::default();
        builder.set_metadata_size(6);
        let metadata = LevelData::new(
            LevelDataHeader {
                instance_id: 9,
                layer_bit: 2,
                ..Default::default()
            },
            vec![0xde, 0xad, 0xbe, 0xef],
        );
        builder.add_box_at(&Aabb::new(Vec3::ZERO, Vec3::new(3.0, 2.0, 2.0)), &Affine3A::IDENTITY, &metadata);
        builder.add_box_at(
            &Aabb::new(Vec3::new(0.0, 4.0, 0.0), Vec3::new(2.0, 4.5, 2.0)),
            &Affine3A::IDENTITY,
            &metadata,
        );
        builder.build(&Executor::new(2)).unwrap()
    }

    fn to_bytes(map: &TacticalMap) -> Vec<u8> {
        let mut buf = Vec::new();
        save(map, &mut buf).unwrap();
        buf
    }

    fn level_bits(level: &TileLevel) -> Vec<u32> {
        let mut bits: Vec<u32> = level.floor.to_array().iter().map(|v| v.to_bits()).collect();
        bits.extend(level.ceiling.to_array().iter().map(|v| v.to_bits()));
        bits.extend([level.base_height.to_bits(), level.roof_delta.to_bits(), level.data_index]);
        bits
    }

    #[test]
    fn test_round_trip_bit_exact() {
        let map = built_map();
        let bytes = to_bytes(&map);
        let loaded = load(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(loaded.grid(), map.grid());
        assert_eq!(loaded.metadata_size(), 6);
        assert_eq!(loaded.tiles(), map.tiles());
        assert_eq!(loaded.levels().len(), map.levels().len());
        for (a, b) in loaded.levels().iter().zip(map.levels()) {
            assert_eq!(level_bits(a), level_bits(b));
        }
        assert_eq!(loaded.level_data(), map.level_data());
        assert_eq!(loaded.level_data()[0].payload, vec![0xde, 0xad, 0xbe, 0xef, 0, 0]);

        // Saving the loaded map reproduces the same bytes.
        assert_eq!(to_bytes(&loaded), bytes);
    }

    #[test]
    fn test_major_version_mismatch_rejected() {
        let mut bytes = to_bytes(&uniform_map(2, 2, &[(0.0, 3.0)], StructuralType::Wall, 3));
        bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            load(&mut Cursor::new(&bytes)),
            Err(FormatError::UnsupportedVersion { major: 2, .. })
        ));
    }

    #[test]
    fn test_minor_version_accepted() {
        let mut bytes = to_bytes(&uniform_map(2, 2, &[(0.0, 3.0)], StructuralType::Wall, 3));
        bytes[6..8].copy_from_slice(&7u16.to_le_bytes());
        assert!(load(&mut Cursor::new(&bytes)).is_ok());
    }

    #[test]
    fn test_record_size_mismatch_rejected() {
        let mut bytes = to_bytes(&uniform_map(1, 1, &[(0.0, 3.0)], StructuralType::Wall, 3));
        // Level record size follows magic, version, chunk header and tile size.
        bytes[20..24].copy_from_slice(&52u32.to_le_bytes());
        assert!(matches!(
            load(&mut Cursor::new(&bytes)),
            Err(FormatError::RecordSize { record: "level", found: 52, .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_label_rejected() {
        let bytes = to_bytes(&uniform_map(1, 1, &[(0.0, 3.0)], StructuralType::Wall, 3));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(load(&mut Cursor::new(&bad_magic)), Err(FormatError::BadMagic(_))));

        let mut bad_label = bytes.clone();
        let at = bytes.windows(4).position(|w| w == CHUNK_TILES).unwrap();
        bad_label[at..at + 4].copy_from_slice(b"TILX");
        assert!(matches!(
            load(&mut Cursor::new(&bad_label)),
            Err(FormatError::ChunkMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let bytes = to_bytes(&uniform_map(2, 2, &[(0.0, 3.0)], StructuralType::Wall, 3));
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(load(&mut Cursor::new(truncated)), Err(FormatError::Io(_))));
    }

    #[test]
    fn test_oversized_counts_rejected_before_allocating() {
        let bytes = to_bytes(&uniform_map(1, 1, &[(0.0, 3.0)], StructuralType::Wall, 3));

        let mut huge_metadata = bytes.clone();
        huge_metadata[28..32].copy_from_slice(&(1u32 << 30).to_le_bytes());
        assert!(matches!(
            load(&mut Cursor::new(&huge_metadata)),
            Err(FormatError::MetadataTooLarge { size, .. }) if size == 1 << 30
        ));

        // A level count matching its chunk size but not the data behind it.
        let mut huge_levels = bytes.clone();
        let level_count = 50_000_000u32;
        huge_levels[44..48].copy_from_slice(&level_count.to_le_bytes());
        huge_levels[80..84].copy_from_slice(&(level_count * LEVEL_RECORD_SIZE as u32).to_le_bytes());
        assert!(matches!(load(&mut Cursor::new(&huge_levels)), Err(FormatError::Io(_))));
    }

    #[test]
    fn test_inconsistent_level_index_rejected() {
        let mut bytes = to_bytes(&uniform_map(1, 1, &[(0.0, 3.0), (3.0, 3.0)], StructuralType::Wall, 3));
        let at = bytes.windows(4).position(|w| w == CHUNK_LEVEL_DATA).unwrap();
        // level_num of the first level data header.
        let level_num = at + 8 + 14;
        bytes[level_num..level_num + 2].copy_from_slice(&5u16.to_le_bytes());
        assert!(matches!(
            load(&mut Cursor::new(&bytes)),
            Err(FormatError::Map(MapError::LevelIndexMismatch { stored: 5, .. }))
        ));
    }
}
