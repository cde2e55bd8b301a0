// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Result extraction from the final layer's output.
//!
//! The last layer writes little-endian `i32` values; field `k` lives at byte
//! offset `4 * k`. Which fields a deployment exposes is a property of the
//! trained network, so the layout is chosen by configuration.

use crate::RuntimeError;
use std::fmt;

/// Named `i32` fields read from the final output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResultLayout {
    name: String,
    fields: Vec<String>,
}

impl ResultLayout {
    /// Steering angle and collision probability.
    pub fn regression() -> Self {
        Self::named("regression", &["steering", "collision"])
    }

    /// Three steering classes and collision.
    pub fn classification() -> Self {
        Self::named(
            "classification",
            &["steering_left", "steering_center", "steering_right", "collision"],
        )
    }

    /// Gate/edge visibility, yaw and three collision zones.
    pub fn imav() -> Self {
        Self::named(
            "imav",
            &[
                "edge_visible",
                "edge_not_visible",
                "corner_visible",
                "yaw",
                "collision_left",
                "collision_center",
                "collision_right",
            ],
        )
    }

    /// `count` anonymous fields `field_0 .. field_{count-1}`.
    pub fn custom(count: usize) -> Self {
        Self {
            name: "custom".into(),
            fields: (0..count).map(|k| format!("field_{k}")).collect(),
        }
    }

    /// Resolves a layout from its configuration name.
    pub fn by_name(name: &str, custom_fields: Option<usize>) -> Result<Self, RuntimeError> {
        match name.to_lowercase().as_str() {
            "regression" => Ok(Self::regression()),
            "classification" => Ok(Self::classification()),
            "imav" => Ok(Self::imav()),
            "custom" => match custom_fields {
                Some(n) if n > 0 => Ok(Self::custom(n)),
                _ => Err(RuntimeError::ConfigError(
                    "custom result layout requires result_fields > 0".into(),
                )),
            },
            other => Err(RuntimeError::ConfigError(format!(
                "unknown result layout '{other}'; expected 'regression', 'classification', 'imav' or 'custom'"
            ))),
        }
    }

    fn named(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Bytes of output the layout reads.
    pub fn byte_len(&self) -> usize {
        self.fields.len() * 4
    }

    /// Reads every field from `output`.
    pub fn extract(&self, output: &[u8]) -> Result<InferenceResult, RuntimeError> {
        if output.len() < self.byte_len() {
            return Err(RuntimeError::Result(format!(
                "layout '{}' needs {} bytes, final output has {}",
                self.name,
                self.byte_len(),
                output.len()
            )));
        }
        let values = self
            .fields
            .iter()
            .zip(output.chunks_exact(4))
            .map(|(field, w)| (field.clone(), i32::from_le_bytes([w[0], w[1], w[2], w[3]])))
            .collect();
        Ok(InferenceResult {
            layout: self.name.clone(),
            values,
        })
    }
}

/// The fixed-length result vector of one pass.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InferenceResult {
    pub layout: String,
    pub values: Vec<(String, i32)>,
}

impl InferenceResult {
    /// Looks up a field by name.
    pub fn get(&self, field: &str) -> Option<i32> {
        self.values.iter().find(|(f, _)| f == field).map(|(_, v)| *v)
    }

    /// The raw values in field order.
    pub fn raw(&self) -> Vec<i32> {
        self.values.iter().map(|(_, v)| *v).collect()
    }
}

impl fmt::Display for InferenceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}: {}", self.layout, parts.join(", "))
    }
}
