//! Known model artifacts and where to get them.

use serde::Serialize;

/// One downloadable model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelArtifact {
    /// Short identifier used on the command line and in logs.
    pub name: &'static str,
    /// File name inside the models directory.
    pub file_name: &'static str,
    /// Primary download URL.
    pub url: &'static str,
    /// Mirrors tried in order after the primary fails.
    pub fallback_urls: &'static [&'static str],
    /// Whether swapping can run without it.
    pub required: bool,
    /// Pinned SHA-256 (lowercase hex). `None` skips verification.
    pub sha256: Option<&'static str>,
    /// Page to point users at when every source fails.
    pub manual_url: &'static str,
    pub description: &'static str,
}

impl ModelArtifact {
    /// Primary URL followed by the fallbacks.
    pub fn sources(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.url).chain(self.fallback_urls.iter().copied())
    }
}

pub const DEFAULT_CATALOG: &[ModelArtifact] = &[
    ModelArtifact {
        name: "inswapper",
        file_name: "inswapper_128.onnx",
        url: "https://huggingface.co/ezioruan/inswapper_128.onnx/resolve/main/inswapper_128.onnx",
        fallback_urls: &[],
        required: true,
        sha256: None,
        manual_url: "https://huggingface.co/ezioruan/inswapper_128.onnx/tree/main",
        description: "face swap model",
    },
    ModelArtifact {
        name: "scrfd",
        file_name: "det_10g.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        fallback_urls: &[],
        required: true,
        sha256: None,
        manual_url: "https://github.com/deepinsight/insightface/releases/tag/v0.7",
        description: "SCRFD face detector (buffalo_l)",
    },
    ModelArtifact {
        name: "arcface",
        file_name: "w600k_r50.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        fallback_urls: &[
            "https://github.com/neutrinographics/faceguard-ml-models/releases/download/models-v1/w600k_r50.onnx",
        ],
        required: true,
        sha256: None,
        manual_url: "https://github.com/deepinsight/insightface/releases/tag/v0.7",
        description: "ArcFace identity embedding (buffalo_l)",
    },
    ModelArtifact {
        name: "gfpgan",
        file_name: "GFPGANv1.4.pth",
        url: "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.0/GFPGANv1.4.pth",
        fallback_urls: &[
            "https://huggingface.co/datasets/Gourieff/ReActor/resolve/main/models/facerestore_models/GFPGANv1.4.pth",
        ],
        required: false,
        sha256: None,
        manual_url: "https://github.com/TencentARC/GFPGAN/releases",
        description: "face restoration (optional)",
    },
];

/// Look up an artifact by `name` or `file_name`.
pub fn find<'c>(catalog: &'c [ModelArtifact], name: &str) -> Option<&'c ModelArtifact> {
    catalog.iter().find(|a| a.name == name || a.file_name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_unique() {
        for (i, a) in DEFAULT_CATALOG.iter().enumerate() {
            for b in &DEFAULT_CATALOG[i + 1..] {
                assert_ne!(a.name, b.name);
                assert_ne!(a.file_name, b.file_name);
            }
        }
    }

    #[test]
    fn test_swap_model_required_restorer_optional() {
        assert!(find(DEFAULT_CATALOG, "inswapper_128.onnx").unwrap().required);
        let gfpgan = find(DEFAULT_CATALOG, "gfpgan").unwrap();
        assert!(!gfpgan.required);
        assert_eq!(gfpgan.fallback_urls.len(), 1);
    }

    #[test]
    fn test_sources_order() {
        let gfpgan = find(DEFAULT_CATALOG, "gfpgan").unwrap();
        let sources: Vec<_> = gfpgan.sources().collect();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].contains("github.com/TencentARC"));
        assert!(sources[1].contains("huggingface.co"));
    }

    #[test]
    fn test_find_unknown() {
        assert!(find(DEFAULT_CATALOG, "unknown").is_none());
    }
}
