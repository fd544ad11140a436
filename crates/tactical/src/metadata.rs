// metadata.rs - Per-solid / per-level gameplay metadata
//
// Every solid carries a metadata blob: a fixed header followed by an opaque
// caller-defined payload of `metadata_size` bytes. When a level is built its
// blob is copied from the dominant floor solid and the header is then
// rewritten with the level's own index, flags and structural data.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Level collapsed after damage; skipped by lookups.
pub const LEVEL_FLAG_DESTROYED: u32 = 0x0001;
/// Level has a valid ceiling plane.
pub const LEVEL_FLAG_ROOF_VALID: u32 = 0x0002;
/// Solid (input) or level (output) can be damaged.
pub const LEVEL_FLAG_DESTRUCTIBLE: u32 = 0x0004;
/// Level takes part in structural collapse.
pub const LEVEL_FLAG_STRUCTURAL: u32 = 0x0008;

/// Serialized size of `LevelDataHeader`.
pub const LEVEL_DATA_HEADER_SIZE: usize = 20;

/// Largest opaque payload a level may carry.
pub const MAX_METADATA_SIZE: u32 = 64 * 1024;

/// Highest valid layer bit.
pub const MAX_LAYER_BIT: u8 = 31;

// ============================================================================
// Structural type
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StructuralType {
    #[default]
    NotStructural = 0,
    Floor = 1,
    Wall = 2,
    /// Immovable; never loses integrity.
    World = 3,
}

impl StructuralType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotStructural),
            1 => Some(Self::Floor),
            2 => Some(Self::Wall),
            3 => Some(Self::World),
            _ => None,
        }
    }

    /// Combine two contributions: World > Wall > Floor > NotStructural.
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }

    /// Whether damage reduces the integrity of a level of this type.
    pub fn is_damageable(self) -> bool {
        matches!(self, Self::Floor | Self::Wall)
    }
}

// ============================================================================
// Header
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelDataHeader {
    pub flags: u32,
    pub instance_id: u32,
    pub name_hash: u32,
    /// Layer bit 0..=31 tested against lookup masks.
    pub layer_bit: u8,
    pub structural_type: StructuralType,
    /// Index of the level inside its tile; must match its position.
    pub level_num: u16,
    pub structural_integrity: i32,
}

impl LevelDataHeader {
    pub fn has_flag(&self, flag: u32) -> bool {
        (self.flags & flag) != 0
    }

    pub fn set_flag(&mut self, flag: u32, enabled: bool) {
        if enabled {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.has_flag(LEVEL_FLAG_DESTROYED)
    }

    pub fn layer_mask(&self) -> u32 {
        1u32 << self.layer_bit.min(MAX_LAYER_BIT)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u32::<LittleEndian>(self.instance_id)?;
        writer.write_u32::<LittleEndian>(self.name_hash)?;
        writer.write_u8(self.layer_bit)?;
        writer.write_u8(self.structural_type as u8)?;
        writer.write_u16::<LittleEndian>(self.level_num)?;
        writer.write_i32::<LittleEndian>(self.structural_integrity)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let flags = reader.read_u32::<LittleEndian>()?;
        let instance_id = reader.read_u32::<LittleEndian>()?;
        let name_hash = reader.read_u32::<LittleEndian>()?;
        let layer_bit = reader.read_u8()?;
        let raw_type = reader.read_u8()?;
        let structural_type = StructuralType::from_u8(raw_type).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown structural type {}", raw_type),
            )
        })?;
        let level_num = reader.read_u16::<LittleEndian>()?;
        let structural_integrity = reader.read_i32::<LittleEndian>()?;
        Ok(Self {
            flags,
            instance_id,
            name_hash,
            layer_bit,
            structural_type,
            level_num,
            structural_integrity,
        })
    }
}

// ============================================================================
// Blob
// ============================================================================

/// Header plus opaque payload. Used both for solid input metadata and for the
/// per-level records of the runtime map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelData {
    pub header: LevelDataHeader,
    pub payload: Vec<u8>,
}

impl LevelData {
    pub fn new(header: LevelDataHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Copy with the payload zero-padded or truncated to `size` bytes.
    pub fn resized(&self, size: usize) -> Self {
        let mut payload = self.payload.clone();
        payload.resize(size, 0);
        Self {
            header: self.header,
            payload,
        }
    }
}

/// FNV-1a hash used for the `name_hash` header field.
pub fn name_hash(name: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_size() {
        let header = LevelDataHeader {
            flags: LEVEL_FLAG_ROOF_VALID | LEVEL_FLAG_STRUCTURAL,
            instance_id: 7,
            name_hash: name_hash("tower"),
            layer_bit: 3,
            structural_type: StructuralType::Wall,
            level_num: 2,
            structural_integrity: -1,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), LEVEL_DATA_HEADER_SIZE);
        let read = LevelDataHeader::read_from(&mut std::io::Cursor::new(&buf)).unwrap();
        assert_eq!(read, header);
    }

    #[test]
    fn test_unknown_structural_type_rejected() {
        let mut buf = Vec::new();
        LevelDataHeader::default().write_to(&mut buf).unwrap();
        buf[13] = 9;
        assert!(LevelDataHeader::read_from(&mut std::io::Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_structural_type_precedence() {
        use StructuralType::*;
        assert_eq!(Floor.combine(Wall), Wall);
        assert_eq!(Wall.combine(World), World);
        assert_eq!(NotStructural.combine(Floor), Floor);
        assert_eq!(World.combine(NotStructural), World);
        assert!(Wall.is_damageable());
        assert!(!World.is_damageable());
        assert!(!NotStructural.is_damageable());
    }

    #[test]
    fn test_flags_and_mask() {
        let mut header = LevelDataHeader {
            layer_bit: 5,
            ..Default::default()
        };
        header.set_flag(LEVEL_FLAG_DESTROYED, true);
        assert!(header.is_destroyed());
        header.set_flag(LEVEL_FLAG_DESTROYED, false);
        assert!(!header.is_destroyed());
        assert_eq!(header.layer_mask(), 1 << 5);
    }

    #[test]
    fn test_resized_payload() {
        let data = LevelData::new(LevelDataHeader::default(), vec![1, 2, 3]);
        assert_eq!(data.resized(5).payload, vec![1, 2, 3, 0, 0]);
        assert_eq!(data.resized(1).payload, vec![1]);
    }

    #[test]
    fn test_name_hash_stable() {
        assert_eq!(name_hash(""), 0x811c_9dc5);
        assert_ne!(name_hash("a"), name_hash("b"));
    }
}
