//! Per-detection measurement table (CSV).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::record::DetectionRecord;

pub const HEADER: &[&str] = &[
    "Frame",
    "Timestamp",
    "Width_px",
    "Height_px",
    "Depth_cm",
    "Category",
    "Confidence",
    "X1",
    "Y1",
    "X2",
    "Y2",
    "Priority",
];

pub struct MeasurementWriter<W: Write> {
    out: W,
    rows: u64,
}

impl MeasurementWriter<BufWriter<File>> {
    /// Create (truncate) a CSV file and write the header row.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create measurements file {}", path.display()))?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> MeasurementWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        write_row(&mut out, HEADER.iter().copied())?;
        Ok(Self { out, rows: 0 })
    }

    pub fn write_record(
        &mut self,
        frame_index: u64,
        timestamp_secs: f64,
        record: &DetectionRecord,
    ) -> Result<()> {
        let bbox = &record.detection.bbox;
        let fields = [
            frame_index.to_string(),
            format!("{:.2}", timestamp_secs),
            record.detection.width().to_string(),
            record.detection.height().to_string(),
            format!("{:.1}", record.depth_cm()),
            record.category.name.clone(),
            format!("{:.3}", record.detection.confidence),
            bbox.x1.to_string(),
            bbox.y1.to_string(),
            bbox.x2.to_string(),
            bbox.y2.to_string(),
            record.category.priority.to_string(),
        ];
        write_row(&mut self.out, fields.iter().map(String::as_str))?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush().context("failed to flush measurements")?;
        Ok(self.out)
    }
}

fn write_row<'a, W: Write>(out: &mut W, fields: impl Iterator<Item = &'a str>) -> Result<()> {
    let line = fields.map(escape).collect::<Vec<_>>().join(",");
    writeln!(out, "{}", line).context("failed to write measurement row")
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{DepthEstimator, DepthModel, Jitter};
    use crate::detect::{BoundingBox, Detection};
    use crate::record::RecordBuilder;
    use crate::severity::{CategoryTable, SeverityCategory};

    fn reference_record() -> DetectionRecord {
        let mut builder = RecordBuilder::new(
            DepthEstimator::new(DepthModel::default(), Jitter::Disabled),
            CategoryTable::enhanced(),
        );
        let det = Detection::new(BoundingBox::new(10, 20, 110, 70).unwrap(), 0.8).unwrap();
        builder.build(det, 1280, 720).unwrap()
    }

    #[test]
    fn header_and_row_formatting() {
        let mut writer = MeasurementWriter::new(Vec::new()).unwrap();
        writer.write_record(45, 1.5, &reference_record()).unwrap();
        assert_eq!(writer.rows(), 1);
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Frame,Timestamp,Width_px,Height_px,Depth_cm,Category,Confidence,X1,Y1,X2,Y2,Priority"
        );
        assert_eq!(lines[1], "45,1.50,100,50,19.5,deep,0.800,10,20,110,70,4");
    }

    #[test]
    fn awkward_category_names_are_quoted() {
        let mut record = reference_record();
        record.category = SeverityCategory::new("deep, \"wide\"", 0.2, 4, [0, 0, 0], "");
        let mut writer = MeasurementWriter::new(Vec::new()).unwrap();
        writer.write_record(1, 0.0, &record).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert!(text.contains(",\"deep, \"\"wide\"\"\","));
    }

    #[test]
    fn create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.csv");
        let mut writer = MeasurementWriter::create(&path).unwrap();
        writer.write_record(1, 0.03, &reference_record()).unwrap();
        writer.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
