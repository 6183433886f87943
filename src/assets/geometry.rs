//! Model Loader Contract
//!
//! The model parser itself is an external collaborator; these are the
//! records it must produce per material group: flat geometry arrays plus
//! the material fields classification needs.

/// Index payload of one geometry group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Indices::U16(v) => v.len(),
            Indices::U32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Indices::U16(v) => v.len() * 2,
            Indices::U32(v) => v.len() * 4,
        }
    }
}

/// One material group's geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryData {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub indices: Indices,
}

impl GeometryData {
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        (self.positions.len() + self.normals.len() + self.uvs.len()) * 4 + self.indices.byte_len()
    }

    /// Mean of the positions, for transparency sorting.
    #[must_use]
    pub fn centroid(&self) -> [f32; 3] {
        let count = self.vertex_count();
        if count == 0 {
            return [0.0; 3];
        }
        let mut sum = [0.0f32; 3];
        for vertex in self.positions.chunks_exact(3) {
            sum[0] += vertex[0];
            sum[1] += vertex[1];
            sum[2] += vertex[2];
        }
        sum.map(|v| v / count as f32)
    }
}

/// One material group's material record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialRecord {
    pub name: String,
    pub texture_path: Option<String>,
    /// Wavefront `d`; `None` reads as fully opaque.
    pub dissolve: Option<f32>,
    pub alpha_map: Option<String>,
}

/// A parsed model: geometry + material per group.
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    pub groups: Vec<(GeometryData, MaterialRecord)>,
}

impl ModelData {
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.groups.iter().map(|(g, _)| g.byte_size()).sum()
    }

    /// Texture paths referenced by any group, deduplicated, order-stable.
    #[must_use]
    pub fn texture_paths(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (_, material) in &self.groups {
            for path in material.texture_path.iter().chain(material.alpha_map.iter()) {
                if !seen.contains(path) {
                    seen.push(path.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_is_position_mean() {
        let geometry = GeometryData {
            positions: vec![0.0, 0.0, 0.0, 2.0, 4.0, 6.0],
            normals: vec![],
            uvs: vec![],
            indices: Indices::U16(vec![0, 1]),
        };
        assert_eq!(geometry.centroid(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn texture_paths_deduplicate() {
        let mut model = ModelData::default();
        let geometry = GeometryData {
            positions: vec![],
            normals: vec![],
            uvs: vec![],
            indices: Indices::U32(vec![]),
        };
        for texture in ["a.png", "b.png", "a.png"] {
            model.groups.push((
                geometry.clone(),
                MaterialRecord {
                    name: "m".into(),
                    texture_path: Some(texture.into()),
                    ..MaterialRecord::default()
                },
            ));
        }
        assert_eq!(model.texture_paths(), vec!["a.png", "b.png"]);
    }
}
