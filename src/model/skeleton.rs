//! Bone hierarchy stored with a model

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::{Mat4, Quat, Vec3};
use crate::core::Result;
use crate::math::Aabb;

/// A single bone in a skeletal hierarchy
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub name: String,
    pub parent_index: Option<usize>,
    pub initial_position: Vec3,
    pub initial_rotation: Quat,
    pub initial_scale: Vec3,
    /// Model space to bone space in the bind pose
    pub offset_matrix: Mat4,
    /// Collision sphere radius
    pub radius: Option<f32>,
    /// Collision box in bone space
    pub bounding_box: Option<Aabb>,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent_index: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent_index,
            initial_position: Vec3::ZERO,
            initial_rotation: Quat::IDENTITY,
            initial_scale: Vec3::ONE,
            offset_matrix: Mat4::IDENTITY,
            radius: None,
            bounding_box: None,
        }
    }

    /// Bind pose relative to the parent
    pub fn local_transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.initial_scale, self.initial_rotation, self.initial_position)
    }
}

/// Bones of a model. Parents may be stored after their children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Skeleton {
    bones: Vec<Bone>,
    bone_names: HashMap<String, usize>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a full bone list, checking that every parent exists and
    /// every chain ends at a root
    pub fn from_bones(bones: Vec<Bone>) -> Result<Self> {
        for (index, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent_index {
                if parent >= bones.len() {
                    return Err(Error::Model(format!("bone {} has missing parent {}", bone.name, parent)));
                }
            }
            // Any chain longer than the bone count loops
            let mut current = bone.parent_index;
            let mut steps = 0;
            while let Some(p) = current {
                steps += 1;
                if steps > bones.len() || p == index {
                    return Err(Error::Model(format!("bone {} is its own ancestor", bone.name)));
                }
                current = bones[p].parent_index;
            }
        }

        let mut bone_names = HashMap::new();
        for (index, bone) in bones.iter().enumerate() {
            bone_names.entry(bone.name.clone()).or_insert(index);
        }
        Ok(Self { bones, bone_names })
    }

    /// Append a bone whose parent is already present. Returns its index.
    pub fn add_bone(&mut self, bone: Bone) -> Result<usize> {
        if let Some(parent) = bone.parent_index {
            if parent >= self.bones.len() {
                return Err(Error::InvalidArgument(format!("invalid parent bone index {}", parent)));
            }
        }
        if self.bone_names.contains_key(&bone.name) {
            return Err(Error::InvalidArgument(format!("bone name {} already exists", bone.name)));
        }
        let index = self.bones.len();
        self.bone_names.insert(bone.name.clone(), index);
        self.bones.push(bone);
        Ok(index)
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bone_names.get(name).copied()
    }

    /// First bone without a parent
    pub fn root_bone(&self) -> Option<usize> {
        self.bones.iter().position(|b| b.parent_index.is_none())
    }

    pub fn children(&self, bone_index: usize) -> Vec<usize> {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.parent_index == Some(bone_index))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Model-space bind pose of a bone
    pub fn bind_pose(&self, bone_index: usize) -> Option<Mat4> {
        let mut transform = self.bones.get(bone_index)?.local_transform();
        let mut current = self.bones[bone_index].parent_index;
        while let Some(parent) = current {
            let bone = self.bones.get(parent)?;
            transform = bone.local_transform() * transform;
            current = bone.parent_index;
        }
        Some(transform)
    }
}
