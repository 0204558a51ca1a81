//! Typed composition requests
//!
//! Parameters arrive as loosely typed JSON. Numbers may be JSON numbers or
//! numeric strings; anything absent or unparsable falls back to its default
//! instead of rejecting the request. Only missing paths are errors.

use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Read `input[key]` as a number, accepting numeric strings.
pub fn number(input: &Value, key: &str) -> Option<f64> {
    let value = match input.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Like [`number`], truncated toward zero.
pub fn integer(input: &Value, key: &str) -> Option<i64> {
    number(input, key).map(|v| v.trunc() as i64)
}

fn path(input: &Value, key: &str) -> Result<PathBuf> {
    match input.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(PathBuf::from(s)),
        _ => Err(ComposeError::config(format!("missing {}", key))),
    }
}

/// Positive value or nothing.
fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageToVideoRequest {
    pub image_path: PathBuf,
    pub duration: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl ImageToVideoRequest {
    pub fn from_json(input: &Value) -> Result<Self> {
        Ok(Self {
            image_path: path(input, "image_path")?,
            duration: positive(number(input, "duration")),
            width: integer(input, "width"),
            height: integer(input, "height"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceToVideoRequest {
    /// In upload order.
    pub image_paths: Vec<PathBuf>,
    pub fps: Option<u32>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl SequenceToVideoRequest {
    pub fn from_json(input: &Value) -> Result<Self> {
        let image_paths = input
            .get("image_paths")
            .and_then(Value::as_array)
            .ok_or_else(|| ComposeError::config("missing image_paths"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(PathBuf::from)
                    .ok_or_else(|| ComposeError::config("image_paths must contain strings"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            image_paths,
            fps: integer(input, "fps")
                .filter(|f| *f > 0)
                .and_then(|f| u32::try_from(f).ok()),
            width: integer(input, "width"),
            height: integer(input, "height"),
        })
    }
}

/// One overlay layer: what to draw, where and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRequest {
    pub path: PathBuf,
    pub x: i64,
    pub y: i64,
    pub start_time: f64,
    /// Explicit end of the visible window. Zero or absent means "not given".
    pub end_time: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl LayerRequest {
    pub fn from_json(input: &Value) -> Result<Self> {
        Ok(Self {
            path: path(input, "path")?,
            x: integer(input, "x").unwrap_or(0),
            y: integer(input, "y").unwrap_or(0),
            start_time: number(input, "startTime").unwrap_or(0.0),
            end_time: positive(number(input, "endTime")),
            width: integer(input, "width"),
            height: integer(input, "height"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayersRequest {
    pub base_path: PathBuf,
    /// Bottom to top.
    pub layers: Vec<LayerRequest>,
    /// Output length cap; also the length of an image base.
    pub duration: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl LayersRequest {
    pub fn from_json(input: &Value) -> Result<Self> {
        let layers = input
            .get("layers")
            .and_then(Value::as_array)
            .ok_or_else(|| ComposeError::config("missing layers"))?
            .iter()
            .map(LayerRequest::from_json)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_path: path(input, "base_path")?,
            layers,
            duration: positive(number(input, "duration")),
            width: integer(input, "width"),
            height: integer(input, "height"),
        })
    }

    /// The single-overlay form: `overlay_path` plus flat timing fields.
    ///
    /// `overlayStartTime` wins over `startTime` when both are present.
    pub fn overlay_from_json(input: &Value) -> Result<Self> {
        let start_time = number(input, "overlayStartTime")
            .or_else(|| number(input, "startTime"))
            .unwrap_or(0.0);

        let layer = LayerRequest {
            path: path(input, "overlay_path")?,
            x: integer(input, "x").unwrap_or(0),
            y: integer(input, "y").unwrap_or(0),
            start_time,
            end_time: positive(number(input, "endTime")),
            width: integer(input, "overlay_width"),
            height: integer(input, "overlay_height"),
        };

        Ok(Self {
            base_path: path(input, "base_path")?,
            layers: vec![layer],
            duration: positive(number(input, "duration")),
            width: integer(input, "width"),
            height: integer(input, "height"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_accept_strings_and_ignore_garbage() {
        let input = json!({"a": 5, "b": "7.5", "c": "soon", "d": null, "e": [1]});
        assert_eq!(number(&input, "a"), Some(5.0));
        assert_eq!(number(&input, "b"), Some(7.5));
        assert_eq!(number(&input, "c"), None);
        assert_eq!(number(&input, "d"), None);
        assert_eq!(number(&input, "e"), None);
        assert_eq!(number(&input, "missing"), None);
        assert_eq!(integer(&input, "b"), Some(7));
    }

    #[test]
    fn image_request_defaults() {
        let req = ImageToVideoRequest::from_json(&json!({
            "image_path": "/uploads/cat.png",
            "duration": "abc",
            "width": "701",
        }))
        .unwrap();
        assert_eq!(req.image_path, PathBuf::from("/uploads/cat.png"));
        assert_eq!(req.duration, None);
        assert_eq!(req.width, Some(701));
        assert_eq!(req.height, None);
    }

    #[test]
    fn missing_path_is_a_config_error() {
        let err = ImageToVideoRequest::from_json(&json!({"duration": 5})).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(SequenceToVideoRequest::from_json(&json!({"image_paths": [1, 2]})).is_err());
    }

    #[test]
    fn overlay_start_time_takes_precedence() {
        let req = LayersRequest::overlay_from_json(&json!({
            "base_path": "/uploads/base.mp4",
            "overlay_path": "/uploads/over.mp4",
            "startTime": 3,
            "overlayStartTime": "1",
            "x": "10",
            "overlay_width": 320,
        }))
        .unwrap();
        let layer = &req.layers[0];
        assert_eq!(layer.start_time, 1.0);
        assert_eq!(layer.x, 10);
        assert_eq!(layer.y, 0);
        assert_eq!(layer.end_time, None);
        assert_eq!(layer.width, Some(320));
    }

    #[test]
    fn zero_end_time_means_not_given() {
        let layer = LayerRequest::from_json(&json!({"path": "/a.png", "endTime": 0})).unwrap();
        assert_eq!(layer.end_time, None);
        let layer = LayerRequest::from_json(&json!({"path": "/a.png", "endTime": "4"})).unwrap();
        assert_eq!(layer.end_time, Some(4.0));
    }

    #[test]
    fn layers_request_parses_each_layer() {
        let req = LayersRequest::from_json(&json!({
            "base_path": "/uploads/base.png",
            "duration": 8,
            "layers": [
                {"path": "/uploads/a.mp4", "startTime": 1},
                {"path": "/uploads/b.png", "x": 40, "y": 40, "endTime": 6}
            ]
        }))
        .unwrap();
        assert_eq!(req.layers.len(), 2);
        assert_eq!(req.duration, Some(8.0));
        assert_eq!(req.layers[1].end_time, Some(6.0));
    }
}
