//! Request and result types for the design generation flow

use serde::{Deserialize, Serialize};

/// Where a style reference came from. Uploads come first in the merged
/// input list, gallery picks after, both in their original order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleSource {
    Upload,
    Gallery,
}

/// A single style reference image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleImage {
    /// Data URL or remote URL of the reference image
    pub url: String,
    pub source: StyleSource,
}

/// User inputs for one generation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignRequest {
    /// Photo of the yard to redesign (data URL or remote URL)
    pub yard_image: String,
    /// Style images the user uploaded, in upload order
    #[serde(default)]
    pub uploaded_styles: Vec<String>,
    /// Gallery styles the user selected, in selection order
    #[serde(default)]
    pub gallery_styles: Vec<String>,
    /// Free-form prompt text
    #[serde(default)]
    pub prompt: String,
    /// Named design style (e.g. "japanese-garden", "desert-modern")
    pub style_id: Option<String>,
    /// Target budget in whole currency units, if the user set one
    pub budget: Option<u32>,
    /// "front_yard" / "back_yard" / "patio" etc.
    pub location_type: Option<String>,
    /// Rough size of the space in square feet
    pub space_size: Option<u32>,
    /// Whether to enrich the prompt from the plant knowledge base
    #[serde(default = "default_true")]
    pub use_rag: bool,
    /// Device token for the anonymous allowance; ignored when authenticated
    pub device_token: Option<String>,
}

fn default_true() -> bool {
    true
}

impl DesignRequest {
    /// Merge gallery-selected styles with uploaded style images into one
    /// ordered input list: upload order first, then gallery-selection order.
    /// Stable, never re-sorted.
    pub fn merged_style_references(&self) -> Vec<StyleImage> {
        let mut refs = Vec::with_capacity(self.uploaded_styles.len() + self.gallery_styles.len());
        for url in &self.uploaded_styles {
            refs.push(StyleImage {
                url: url.clone(),
                source: StyleSource::Upload,
            });
        }
        for url in &self.gallery_styles {
            refs.push(StyleImage {
                url: url.clone(),
                source: StyleSource::Gallery,
            });
        }
        refs
    }
}

/// One recommended plant or hardscape material in a generated design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialItem {
    pub name: String,
    /// Pricing category ("tree", "shrub", "paver", ...)
    pub category: String,
    /// Container or unit size ("5-gallon", "per sq ft", ...)
    #[serde(default)]
    pub size: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// One line of the itemized cost breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateLine {
    pub item: String,
    pub quantity: u32,
    pub unit_low: f64,
    pub unit_high: f64,
    pub total_low: f64,
    pub total_high: f64,
}

/// Cost estimate for a generated design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// ISO 4217 currency code
    pub currency: String,
    pub total_low: f64,
    pub total_high: f64,
    pub line_items: Vec<EstimateLine>,
}

impl Default for CostEstimate {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            total_low: 0.0,
            total_high: 0.0,
            line_items: Vec::new(),
        }
    }
}

/// The generated artifact: immutable once produced within a single flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignResult {
    /// Rendered redesign images, ordered; never empty on success
    pub rendered_images: Vec<String>,
    /// Top-down 2D plan image
    pub plan_image: Option<String>,
    /// Before/after transformation video
    pub video_url: Option<String>,
    /// The source yard photo, carried through for display
    pub yard_image: Option<String>,
    /// Structural analysis / design description text
    pub analysis: String,
    pub estimate: CostEstimate,
    /// Materials the estimate was computed from
    pub materials: Vec<MaterialItem>,
}
