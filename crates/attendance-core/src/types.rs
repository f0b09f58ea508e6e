use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rectangular face region in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence in [0, 1]. Stubs and external detectors may report 1.0.
    pub confidence: f32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clip the region to an image of the given size.
    ///
    /// Returns `None` when nothing of the region lies inside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<FaceRegion> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(FaceRegion { width, height, ..*self })
    }

    /// Copy the region out of `image` as an owned grayscale crop.
    pub fn crop(&self, image: &GrayImage) -> Option<GrayImage> {
        let r = self.clamp_to(image.width(), image.height())?;
        Some(image::imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image())
    }
}

/// Which region wins when a detector reports several faces in one capture.
///
/// Both enrollment and attendance evaluation go through the same policy so a
/// person is trained on the same face they are later recognized by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// The first region in detector order.
    #[default]
    First,
    /// The region with the largest area; ties go to the earlier region.
    Largest,
}

impl SelectionPolicy {
    pub fn select<'a>(&self, regions: &'a [FaceRegion]) -> Option<&'a FaceRegion> {
        match self {
            SelectionPolicy::First => regions.first(),
            SelectionPolicy::Largest => regions
                .iter()
                .reduce(|best, r| if r.area() > best.area() { r } else { best }),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(SelectionPolicy::First),
            "largest" => Ok(SelectionPolicy::Largest),
            other => Err(format!("unknown selection policy: {other}")),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::First => f.write_str("first"),
            SelectionPolicy::Largest => f.write_str("largest"),
        }
    }
}

/// Classifier output for one face crop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Identity id the nearest training sample was labeled with.
    pub label: i64,
    /// Dissimilarity to that sample. Lower = better match.
    pub score: f64,
}

/// One labeled training face.
#[derive(Debug, Clone)]
pub struct LabeledFace {
    pub label: i64,
    pub image: GrayImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: u32, y: u32, w: u32, h: u32) -> FaceRegion {
        FaceRegion::new(x, y, w, h)
    }

    #[test]
    fn test_select_first_keeps_detector_order() {
        let regions = [region(0, 0, 10, 10), region(50, 50, 40, 40)];
        let chosen = SelectionPolicy::First.select(&regions).unwrap();
        assert_eq!(chosen, &regions[0]);
    }

    #[test]
    fn test_select_largest_picks_max_area() {
        let regions = [region(0, 0, 10, 10), region(50, 50, 40, 40), region(5, 5, 20, 20)];
        let chosen = SelectionPolicy::Largest.select(&regions).unwrap();
        assert_eq!(chosen, &regions[1]);
    }

    #[test]
    fn test_select_largest_tie_goes_to_earlier() {
        let regions = [region(0, 0, 20, 10), region(30, 30, 10, 20)];
        let chosen = SelectionPolicy::Largest.select(&regions).unwrap();
        assert_eq!(chosen, &regions[0]);
    }

    #[test]
    fn test_select_empty() {
        assert!(SelectionPolicy::First.select(&[]).is_none());
        assert!(SelectionPolicy::Largest.select(&[]).is_none());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("first".parse::<SelectionPolicy>(), Ok(SelectionPolicy::First));
        assert_eq!(" LARGEST ".parse::<SelectionPolicy>(), Ok(SelectionPolicy::Largest));
        assert!("biggest".parse::<SelectionPolicy>().is_err());
    }

    #[test]
    fn test_clamp_partially_outside() {
        let r = region(90, 90, 20, 20).clamp_to(100, 100).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (90, 90, 10, 10));
    }

    #[test]
    fn test_clamp_fully_outside() {
        assert!(region(100, 0, 5, 5).clamp_to(100, 100).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let img = GrayImage::from_pixel(64, 48, image::Luma([7]));
        let crop = region(10, 5, 20, 30).crop(&img).unwrap();
        assert_eq!(crop.dimensions(), (20, 30));
        assert!(crop.pixels().all(|p| p.0[0] == 7));
    }
}
