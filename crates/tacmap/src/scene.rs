// scene.rs - JSON scene description fed to the builder
//
// {
//   "boxes":  [{ "min": [0,0,0], "max": [4,3,4],
//                "transform": { "translation": [10,0,0], "rotationYDeg": 90 },
//                "metadata": { "instanceId": 3, "name": "wall", "destructible": true,
//                              "payload": "deadbeef" } }],
//   "meshes": [{ "vertices": [[0,0,0], ...], "triangles": [[0,1,2], ...],
//                "transform": { ... }, "metadata": { ... } }]
// }

use std::path::Path;

use anyhow::Context;
use glam::{Affine3A, Quat, Vec3};
use serde::Deserialize;
use tactical_map::metadata::{LEVEL_FLAG_DESTRUCTIBLE, MAX_LAYER_BIT, name_hash};
use tactical_map::{Aabb, LevelData, LevelDataHeader, TacticalMapBuilder, TriMesh};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default)]
    pub rotation_y_deg: f32,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 { 1.0 }

impl Default for Placement {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation_y_deg: 0.0,
            scale: default_scale(),
        }
    }
}

impl Placement {
    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            Quat::from_rotation_y(self.rotation_y_deg.to_radians()),
            Vec3::from_array(self.translation),
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolidMetadata {
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub instance_id: u32,
    /// Hashed into the header's `name_hash`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub layer_bit: u8,
    #[serde(default)]
    pub destructible: bool,
    /// Opaque payload bytes, hex encoded.
    #[serde(default)]
    pub payload: Option<String>,
}

impl SolidMetadata {
    pub fn to_level_data(&self) -> anyhow::Result<LevelData> {
        if self.layer_bit > MAX_LAYER_BIT {
            anyhow::bail!("layer bit {} out of range 0..={}", self.layer_bit, MAX_LAYER_BIT);
        }
        let payload = match &self.payload {
            Some(hex) => data_encoding::HEXLOWER_PERMISSIVE
                .decode(hex.as_bytes())
                .with_context(|| format!("invalid hex payload '{}'", hex))?,
            None => Vec::new(),
        };

        let mut header = LevelDataHeader {
            flags: self.flags,
            instance_id: self.instance_id,
            name_hash: self.name.as_deref().map(name_hash).unwrap_or(0),
            layer_bit: self.layer_bit,
            ..Default::default()
        };
        if self.destructible {
            header.set_flag(LEVEL_FLAG_DESTRUCTIBLE, true);
        }
        Ok(LevelData::new(header, payload))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BoxSolid {
    pub min: [f32; 3],
    pub max: [f32; 3],
    #[serde(default)]
    pub transform: Placement,
    #[serde(default)]
    pub metadata: SolidMetadata,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MeshSolid {
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
    #[serde(default)]
    pub transform: Placement,
    #[serde(default)]
    pub metadata: SolidMetadata,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub boxes: Vec<BoxSolid>,
    #[serde(default)]
    pub meshes: Vec<MeshSolid>,
}

impl Scene {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading scene {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing scene {}", path.display()))
    }

    pub fn solid_count(&self) -> usize {
        self.boxes.len() + self.meshes.len()
    }

    /// Register every solid with `builder`.
    pub fn populate(&self, builder: &mut TacticalMapBuilder) -> anyhow::Result<()> {
        for (idx, solid) in self.boxes.iter().enumerate() {
            let metadata = solid.metadata.to_level_data().with_context(|| format!("box {}", idx))?;
            let bounds = Aabb::new(Vec3::from_array(solid.min), Vec3::from_array(solid.max));
            builder.add_box_at(&bounds, &solid.transform.to_affine(), &metadata);
        }

        for (idx, solid) in self.meshes.iter().enumerate() {
            let metadata = solid.metadata.to_level_data().with_context(|| format!("mesh {}", idx))?;
            let vertex_count = solid.vertices.len() as u32;
            if let Some(bad) = solid.triangles.iter().find(|t| t.iter().any(|&i| i >= vertex_count)) {
                anyhow::bail!("mesh {}: triangle {:?} references a missing vertex", idx, bad);
            }
            let mesh = TriMesh::new(
                solid.vertices.iter().map(|v| Vec3::from_array(*v)).collect(),
                solid.triangles.clone(),
            );
            builder.add_mesh_at(&mesh, &solid.transform.to_affine(), &metadata);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_parses_with_defaults() {
        let scene = Scene::from_json(
            r#"{
                "boxes": [
                    { "min": [0, 0, 0], "max": [2, 3, 2] },
                    { "min": [0, 0, 0], "max": [1, 1, 1],
                      "transform": { "translation": [5, 0, 0] },
                      "metadata": { "instanceId": 4, "name": "crate", "destructible": true,
                                    "payload": "DEADbeef" } }
                ],
                "meshes": [
                    { "vertices": [[0, 0, 0], [1, 0, 0], [0, 0, 1]], "triangles": [[0, 2, 1]] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(scene.solid_count(), 3);
        assert_eq!(scene.boxes[0].transform.scale, 1.0);

        let data = scene.boxes[1].metadata.to_level_data().unwrap();
        assert_eq!(data.header.instance_id, 4);
        assert_eq!(data.header.name_hash, name_hash("crate"));
        assert!(data.header.has_flag(LEVEL_FLAG_DESTRUCTIBLE));
        assert_eq!(data.payload, vec![0xde, 0xad, 0xbe, 0xef]);

        let mut builder = TacticalMapBuilder::default();
        scene.populate(&mut builder).unwrap();
        assert_eq!(builder.solid_count(), 3);
    }

    #[test]
    fn test_placement_rotates_about_y() {
        let placement = Placement {
            translation: [1.0, 2.0, 3.0],
            rotation_y_deg: 90.0,
            scale: 2.0,
        };
        let moved = placement.to_affine().transform_point3(Vec3::X);
        assert!((moved - Vec3::new(1.0, 2.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_bad_metadata_rejected() {
        let bad_hex = SolidMetadata {
            payload: Some("xyz".into()),
            ..Default::default()
        };
        assert!(bad_hex.to_level_data().is_err());

        let bad_layer = SolidMetadata {
            layer_bit: 40,
            ..Default::default()
        };
        assert!(bad_layer.to_level_data().is_err());

        let scene = Scene::from_json(r#"{ "meshes": [{ "vertices": [[0,0,0]], "triangles": [[0,1,2]] }] }"#).unwrap();
        let mut builder = TacticalMapBuilder::default();
        assert!(scene.populate(&mut builder).is_err());
    }
}
