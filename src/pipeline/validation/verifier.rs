//! Stamp verification: ORB keypoint matching of a located crop against the
//! authorized reference stamps.

use std::path::Path;

use tracing::{debug, warn};

use super::orb::{cross_check_matches, OrbExtractor};
use super::preprocess::{load_prepared, StampTemplate};
use crate::config::Thresholds;

/// Confirms a located stamp crop against the authorized stamps by
/// keypoint matching. The first reference with enough cross-checked
/// matches wins; there is no search for a global best.
pub struct StampVerifier {
    orb: OrbExtractor,
    blur_sigma: f32,
    /// Verified when the match count is strictly greater than this.
    min_matches: usize,
}

impl StampVerifier {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            orb: OrbExtractor::new(thresholds.max_keypoints),
            blur_sigma: thresholds.blur_sigma,
            min_matches: thresholds.keypoint_matches,
        }
    }

    /// Whether the crop at `candidate_path` matches any reference stamp.
    /// An unreadable crop or one without keypoints is simply not verified.
    pub fn verify_stamp(&self, candidate_path: &Path, references: &[StampTemplate]) -> bool {
        let candidate = match load_prepared(candidate_path, self.blur_sigma) {
            Ok(img) => img,
            Err(e) => {
                warn!(path = %candidate_path.display(), error = %e, "Cannot load stamp candidate");
                return false;
            }
        };

        let candidate_features = self.orb.detect_and_compute(&candidate);
        if candidate_features.is_empty() {
            debug!("No keypoints detected in stamp candidate");
            return false;
        }

        for reference in references {
            let reference_features = self.orb.detect_and_compute(&reference.gray);
            if reference_features.is_empty() {
                debug!(stamp_id = reference.stamp_id, "No keypoints in reference stamp, skipping");
                continue;
            }

            let matches = cross_check_matches(
                &candidate_features.descriptors,
                &reference_features.descriptors,
            );
            debug!(
                stamp_id = reference.stamp_id,
                candidate_keypoints = candidate_features.len(),
                reference_keypoints = reference_features.len(),
                matches = matches.len(),
                "Stamp keypoints compared"
            );

            if matches.len() > self.min_matches {
                debug!(stamp_id = reference.stamp_id, "Stamp verified");
                return true;
            }
        }

        debug!("No reference stamp matched");
        false
    }
}
