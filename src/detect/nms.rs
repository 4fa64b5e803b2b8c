use crate::detect::result::Detection;

/// Greedy non-maximum suppression.
///
/// Keeps the highest-confidence box of every cluster whose pairwise IoU
/// exceeds `iou_threshold`. Output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|keep| keep.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x1, y1, x2, y2).unwrap(), confidence).unwrap()
    }

    #[test]
    fn suppresses_overlapping_lower_confidence() {
        let kept = non_max_suppression(
            vec![
                det(0, 0, 100, 100, 0.6),
                det(5, 5, 105, 105, 0.9),
                det(300, 300, 350, 350, 0.4),
            ],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.4);
    }

    #[test]
    fn keeps_boxes_below_threshold() {
        let kept = non_max_suppression(vec![det(0, 0, 10, 10, 0.5), det(5, 0, 15, 10, 0.7)], 0.4);
        assert_eq!(kept.len(), 2);
    }
}
