//! Display attributes per device, injected into the engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// How a marker or cluster is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayStyle {
    /// Fill color as a CSS hex string
    pub color: String,
    /// Circle radius in pixels
    pub radius: f64,
    pub stroke_color: String,
    pub stroke_width: f64,
    /// Size label for multi-member clusters; `None` for single markers
    pub label: Option<String>,
}

/// Device → color mapping with a fallback for unlisted devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub colors: HashMap<DeviceId, String>,
    pub fallback_color: String,
    pub radius: f64,
    pub stroke_color: String,
    pub stroke_width: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        let colors = [
            ("dev001", "#e74c3c"),
            ("dev002", "#3498db"),
            ("dev003", "#2ecc71"),
            ("dev004", "#f1c40f"),
            ("dev005", "#9b59b6"),
        ]
        .into_iter()
        .map(|(id, color)| (id.to_string(), color.to_string()))
        .collect();

        Self {
            colors,
            fallback_color: "#34495e".to_string(),
            radius: 7.0,
            stroke_color: "white".to_string(),
            stroke_width: 2.0,
        }
    }
}

impl StyleConfig {
    /// Config with no per-device colors; everything uses the fallback.
    pub fn empty() -> Self {
        Self {
            colors: HashMap::new(),
            ..Self::default()
        }
    }

    pub fn with_color(mut self, device_id: &str, color: &str) -> Self {
        self.colors.insert(device_id.to_string(), color.to_string());
        self
    }

    pub fn color_for(&self, device_id: &str) -> &str {
        self.colors
            .get(device_id)
            .map(String::as_str)
            .unwrap_or(&self.fallback_color)
    }

    /// Style of a single marker for a device.
    pub fn marker_style(&self, device_id: &str) -> DisplayStyle {
        DisplayStyle {
            color: self.color_for(device_id).to_string(),
            radius: self.radius,
            stroke_color: self.stroke_color.clone(),
            stroke_width: self.stroke_width,
            label: None,
        }
    }

    /// Style of a cluster: the representative device's color, labelled with
    /// the member count. A single-member cluster is its marker's style.
    pub fn cluster_style(&self, representative: Option<&str>, member_count: usize) -> DisplayStyle {
        let base = match representative {
            Some(device_id) => self.marker_style(device_id),
            None => DisplayStyle {
                color: self.fallback_color.clone(),
                radius: self.radius,
                stroke_color: self.stroke_color.clone(),
                stroke_width: self.stroke_width,
                label: None,
            },
        };
        if member_count <= 1 {
            return base;
        }
        DisplayStyle {
            // Grow with the digit count so the label fits
            radius: self.radius + 3.0 * member_count.to_string().len() as f64,
            label: Some(member_count.to_string()),
            ..base
        }
    }
}
