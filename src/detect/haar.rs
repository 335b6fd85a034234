//! Viola-Jones style Haar cascade detector.
//!
//! Loads boosted cascades in the OpenCV XML format (e.g. `haarcascade_frontalface_default.xml`)
//! and scans an image pyramid with a fixed-size window. Only upright features are supported.

use std::path::Path;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::GrayImage;
use roxmltree::{Document, Node};
use tracing::{debug, info, instrument, warn};

use super::group::group_rectangles;
use super::{Region, RegionDetector};
use crate::error::{CascadeError, PipelineError};
use crate::DetectorConfig;

/// Relative size difference under which raw hits are considered the same object.
const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A parsed boosted cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    width: u32,
    height: u32,
    stages: Vec<Stage>,
    features: Vec<Feature>,
}

impl Cascade {
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(xml: &str) -> Result<Self, CascadeError> {
        let doc = Document::parse(xml)?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or(CascadeError::MissingElement("cascade"))?;

        if let Some(kind) = child(root, "stageType").ok().and_then(|n| n.text()) {
            if !kind.trim().eq_ignore_ascii_case("BOOST") {
                return Err(CascadeError::Unsupported(format!("stage type {}", kind.trim())));
            }
        }
        let feature_type = text_of(root, "featureType")?;
        if !feature_type.eq_ignore_ascii_case("HAAR") {
            return Err(CascadeError::Unsupported(format!("feature type {feature_type}")));
        }

        let width: u32 = parse_value("width", text_of(root, "width")?)?;
        let height: u32 = parse_value("height", text_of(root, "height")?)?;
        if width < 3 || height < 3 {
            return Err(CascadeError::Unsupported(format!("window {width}x{height}")));
        }

        let features = elements(child(root, "features")?)
            .map(|node| parse_feature(node, width, height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = elements(child(root, "stages")?)
            .map(|node| parse_stage(node, features.len()))
            .collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(CascadeError::MissingElement("stages"));
        }

        Ok(Self {
            width,
            height,
            stages,
            features,
        })
    }

    /// Window size the cascade was trained on.
    pub fn window(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Runs every stage at window origin (`x`, `y`) of an integral image.
    fn classify(&self, integral: &Integral, x: u32, y: u32) -> bool {
        // Variance normalisation over the window shrunk by one pixel on each side
        let (nw, nh) = (self.width - 2, self.height - 2);
        let area = f64::from(nw * nh);
        let sum = integral.sum(x + 1, y + 1, nw, nh) as f64;
        let sq_sum = integral.sq_sum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sq_sum - sum * sum;
        let norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|weak| {
                    let mut idx = 0usize;
                    loop {
                        let node = weak.nodes[idx];
                        let value = self.features[node.feature]
                            .rects
                            .iter()
                            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
                            .sum::<f64>()
                            * norm;
                        let next = if value < node.threshold { node.left } else { node.right };
                        if next <= 0 {
                            break weak.leaves[(-next) as usize];
                        }
                        idx = next as usize;
                    }
                })
                .sum();
            total >= stage.threshold
        })
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> Result<Node<'a, 'input>, CascadeError> {
    elements(node)
        .find(|n| n.has_tag_name(name))
        .ok_or(CascadeError::MissingElement(name))
}

fn text_of<'a>(node: Node<'a, '_>, name: &'static str) -> Result<&'a str, CascadeError> {
    child(node, name)?
        .text()
        .map(str::trim)
        .ok_or(CascadeError::MissingElement(name))
}

fn parse_value<T: std::str::FromStr>(element: &'static str, value: &str) -> Result<T, CascadeError> {
    value.parse().map_err(|_| CascadeError::InvalidValue {
        element,
        value: value.to_string(),
    })
}

fn parse_numbers(element: &'static str, text: &str) -> Result<Vec<f64>, CascadeError> {
    text.split_whitespace()
        .map(|v| parse_value::<f64>(element, v))
        .collect()
}

fn parse_feature(node: Node<'_, '_>, width: u32, height: u32) -> Result<Feature, CascadeError> {
    if let Ok(tilted) = text_of(node, "tilted") {
        if tilted != "0" {
            return Err(CascadeError::Unsupported("tilted features".into()));
        }
    }

    let rects = elements(child(node, "rects")?)
        .map(|r| {
            let text = r.text().unwrap_or_default();
            let v = parse_numbers("rects", text)?;
            if v.len() != 5 || v[..4].iter().any(|n| *n < 0.0) {
                return Err(CascadeError::InvalidValue {
                    element: "rects",
                    value: text.to_string(),
                });
            }
            let rect = WeightedRect {
                x: v[0] as u32,
                y: v[1] as u32,
                width: v[2] as u32,
                height: v[3] as u32,
                weight: v[4],
            };
            if rect.x + rect.width > width || rect.y + rect.height > height {
                return Err(CascadeError::InvalidValue {
                    element: "rects",
                    value: text.to_string(),
                });
            }
            Ok(rect)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Feature { rects })
}

fn parse_stage(node: Node<'_, '_>, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold = parse_value("stageThreshold", text_of(node, "stageThreshold")?)?;

    let classifiers = elements(child(node, "weakClassifiers")?)
        .map(|weak| {
            let raw_nodes = text_of(weak, "internalNodes")?;
            let values = parse_numbers("internalNodes", raw_nodes)?;
            let leaves = parse_numbers("leafValues", text_of(weak, "leafValues")?)?;
            if values.is_empty() || values.len() % 4 != 0 {
                return Err(CascadeError::InvalidValue {
                    element: "internalNodes",
                    value: raw_nodes.to_string(),
                });
            }

            let nodes: Vec<TreeNode> = values
                .chunks_exact(4)
                .map(|n| TreeNode {
                    left: n[0] as i32,
                    right: n[1] as i32,
                    feature: n[2] as usize,
                    threshold: n[3],
                })
                .collect();

            let valid = nodes.iter().all(|n| {
                n.feature < feature_count
                    && [n.left, n.right].iter().all(|&c| {
                        if c > 0 {
                            (c as usize) < nodes.len()
                        } else {
                            ((-c) as usize) < leaves.len()
                        }
                    })
            });
            if !valid {
                return Err(CascadeError::InvalidValue {
                    element: "internalNodes",
                    value: raw_nodes.to_string(),
                });
            }

            Ok(WeakClassifier { nodes, leaves })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stage {
        threshold,
        classifiers,
    })
}

/// Summed-area tables of pixel values and their squares.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let (mut row_sum, mut row_sq) = (0u64, 0u64);
            for x in 0..w {
                let v = u64::from(image.get_pixel(x as u32, y as u32).0[0]);
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> i64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] as i64 + table[y0 * stride + x0] as i64
            - table[y0 * stride + x1] as i64
            - table[y1 * stride + x0] as i64
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        Self::rect(&self.sq, self.stride, x, y, w, h)
    }
}

/// Region detector driven by a Haar cascade model file.
pub struct HaarCascadeDetector {
    cascade: Option<Cascade>,
    scale_factor: f64,
    min_neighbors: u32,
    min_size: u32,
}

impl HaarCascadeDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            cascade: None,
            scale_factor: config.scale_factor.max(1.01),
            min_neighbors: config.min_neighbors,
            min_size: config.min_size,
        }
    }

    /// Builds a detector around an already parsed cascade.
    pub fn with_cascade(config: &DetectorConfig, cascade: Cascade) -> Self {
        Self {
            cascade: Some(cascade),
            ..Self::new(config)
        }
    }
}

impl RegionDetector for HaarCascadeDetector {
    fn load_model(&mut self, path: &Path) -> bool {
        match Cascade::load(path) {
            Ok(cascade) => {
                info!(
                    "Loaded cascade {} ({} stages, {}x{} window)",
                    path.display(),
                    cascade.stages.len(),
                    cascade.width,
                    cascade.height
                );
                self.cascade = Some(cascade);
                true
            }
            Err(source) => {
                let e = PipelineError::ModelLoadFailed {
                    path: path.to_path_buf(),
                    source,
                };
                warn!("{}; detection disabled", e);
                self.cascade = None;
                false
            }
        }
    }

    fn is_loaded(&self) -> bool {
        self.cascade.is_some()
    }

    #[instrument(skip_all, fields(w = gray.width(), h = gray.height()))]
    fn detect(&mut self, gray: &GrayImage) -> Vec<Region> {
        let Some(cascade) = self.cascade.as_ref() else {
            return Vec::new();
        };
        let start = Instant::now();
        let (img_w, img_h) = gray.dimensions();
        let (cw, ch) = cascade.window();
        let mut hits = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let win_w = (f64::from(cw) * factor).round() as u32;
            let win_h = (f64::from(ch) * factor).round() as u32;
            let scaled_w = (f64::from(img_w) / factor).round() as u32;
            let scaled_h = (f64::from(img_h) / factor).round() as u32;
            if scaled_w < cw || scaled_h < ch || win_w > img_w || win_h > img_h {
                break;
            }
            if win_w < self.min_size || win_h < self.min_size {
                factor *= self.scale_factor;
                continue;
            }

            let scaled = if factor == 1.0 {
                gray.clone()
            } else {
                imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
            };
            let integral = Integral::new(&scaled);
            let step = if factor > 2.0 { 1 } else { 2 };

            for y in (0..=scaled_h - ch).step_by(step) {
                for x in (0..=scaled_w - cw).step_by(step) {
                    if cascade.classify(&integral, x, y) {
                        hits.push(Region::new(
                            (f64::from(x) * factor).round() as i32,
                            (f64::from(y) * factor).round() as i32,
                            win_w,
                            win_h,
                        ));
                    }
                }
            }
            factor *= self.scale_factor;
        }

        let regions = group_rectangles(&hits, self.min_neighbors, GROUP_EPS);
        debug!(
            "{} raw hits, {} regions in {:?}",
            hits.len(),
            regions.len(),
            start.elapsed()
        );
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// One stage with a single stump: bright lower half against a dark upper half.
    const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 1.0000000000000000e-02</internalNodes>
          <leafValues>-1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 24 12 -1.</_>
        <_>0 12 24 12 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn config(min_neighbors: u32) -> DetectorConfig {
        DetectorConfig {
            min_neighbors,
            ..DetectorConfig::default()
        }
    }

    fn edge_image(top: u8, bottom: u8) -> GrayImage {
        GrayImage::from_fn(48, 48, |_, y| Luma([if y < 24 { top } else { bottom }]))
    }

    #[test]
    fn parses_opencv_cascade() {
        let cascade = Cascade::parse(EDGE_CASCADE).unwrap();
        assert_eq!(cascade.window(), (24, 24));
        assert_eq!(cascade.stages.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
    }

    #[test]
    fn finds_matching_edge() {
        let cascade = Cascade::parse(EDGE_CASCADE).unwrap();
        let mut detector = HaarCascadeDetector::with_cascade(&config(0), cascade);
        assert!(!detector.detect(&edge_image(0, 255)).is_empty());
    }

    #[test]
    fn rejects_uniform_and_inverted_images() {
        let cascade = Cascade::parse(EDGE_CASCADE).unwrap();
        let mut detector = HaarCascadeDetector::with_cascade(&config(0), cascade);
        assert!(detector.detect(&edge_image(90, 90)).is_empty());
        assert!(detector.detect(&edge_image(255, 0)).is_empty());
    }

    #[test]
    fn missing_model_disables_detection() {
        let mut detector = HaarCascadeDetector::new(&config(3));
        assert!(!detector.load_model(Path::new("/nonexistent/cascade.xml")));
        assert!(!detector.is_loaded());
        assert!(detector.detect(&edge_image(0, 255)).is_empty());
    }

    #[test]
    fn tilted_features_are_rejected() {
        let xml = EDGE_CASCADE.replace(
            "</rects></_></features>",
            "</rects><tilted>1</tilted></_></features>",
        );
        assert!(matches!(
            Cascade::parse(&xml),
            Err(CascadeError::Unsupported(_))
        ));
    }

    #[test]
    fn out_of_range_feature_index_is_rejected() {
        let xml = EDGE_CASCADE.replace("0 -1 0 1.0", "0 -1 7 1.0");
        assert!(matches!(
            Cascade::parse(&xml),
            Err(CascadeError::InvalidValue { .. })
        ));
    }
}
