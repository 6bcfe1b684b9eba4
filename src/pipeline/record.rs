use chrono::NaiveDate;
use serde::Serialize;

/// One table row: the reduced value of a scene with its calendar fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRecord {
    /// `dd-MM-yyyy`
    pub date: String,
    /// `yyyy`
    pub year: String,
    /// Month without padding
    pub month: String,
    /// Day without padding
    pub day: String,
    /// None when no pixel qualified
    pub statistic_value: Option<f64>,
    pub source_label: String,

    /// Diagnostics, not written to tables
    #[serde(skip)]
    pub scene_id: String,
    #[serde(skip)]
    pub pixel_count: usize,
}

impl AggregateRecord {
    pub fn new(
        scene_id: impl Into<String>,
        date: NaiveDate,
        statistic_value: Option<f64>,
        pixel_count: usize,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            date: date.format("%d-%m-%Y").to_string(),
            year: date.format("%Y").to_string(),
            month: date.format("%-m").to_string(),
            day: date.format("%-d").to_string(),
            statistic_value,
            source_label: source_label.into(),
            scene_id: scene_id.into(),
            pixel_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_fields() {
        let date = NaiveDate::from_ymd_opt(2010, 2, 9).unwrap();
        let record = AggregateRecord::new("s", date, Some(0.42), 10, "MODIS");

        assert_eq!(record.date, "09-02-2010");
        assert_eq!(record.year, "2010");
        assert_eq!(record.month, "2");
        assert_eq!(record.day, "9");
    }

    #[test]
    fn test_serialize_skips_diagnostics() {
        let date = NaiveDate::from_ymd_opt(2010, 12, 27).unwrap();
        let record = AggregateRecord::new("s", date, None, 0, "MODIS");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["month"], "12");
        assert!(json["statistic_value"].is_null());
        assert!(json.get("scene_id").is_none());
    }
}
